// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Wiring of the bootstrap steps for one host process.
//!
//! The host calls, in order: [`Bootstrap::handle_options`] with its raw
//! arguments, [`Bootstrap::initialize`] before the managed runtime starts
//! and [`Bootstrap::on_runtime_created`] once it exists. Nothing here ever
//! fails the host; every problem ends with hooking staying inactive.

use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::classpath::{ClasspathInjector, Environment};
use crate::config::BootstrapConfig;
use crate::context::{ProcessRole, SharedContext};
use crate::file_access::{DirectFileAccess, FileAccess};
use crate::flags::{FlagPaths, FlagStore};
use crate::gate::{AbortReason, ActivationGate, Decision, GateSettings};
use crate::loader::{Activation, ModuleLoader, ModuleRegistry, RuntimeHandle};
use crate::membrane::MembraneFileAccess;
use crate::options::{self, OptionsOutcome};
use crate::posture::SecurityPosture;
use crate::props::{PropertyFiles, PropertyStore};
use crate::runtime::{identify_runtime, RuntimeDescriptor};
use crate::safemode::{self, SafemodeTrigger};
use crate::services::{CommandServices, ServiceSupervisor};

pub struct Bootstrap {
    config: BootstrapConfig,
    settings: GateSettings,
    context: SharedContext,
    files: Arc<dyn FileAccess>,
    flags: FlagStore,
    properties: Box<dyn PropertyStore>,
    services: Box<dyn ServiceSupervisor>,
    safemode: Box<dyn SafemodeTrigger>,
    classpath: ClasspathInjector,
    loader: ModuleLoader,
    decision: Option<Decision>,
}

impl Bootstrap {
    pub fn builder(config: BootstrapConfig, role: ProcessRole) -> BootstrapBuilder {
        BootstrapBuilder {
            config,
            role,
            class_name: None,
            posture: None,
            files: None,
            properties: None,
            services: None,
            safemode: None,
            registry: None,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    /// Outcome of [`Bootstrap::initialize`], `None` before it ran.
    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    /// Run a diagnostic option if `argv` is exactly one.
    pub fn handle_options<S: AsRef<str>>(
        &self,
        argv: &[S],
        out: &mut dyn Write,
    ) -> io::Result<OptionsOutcome> {
        options::handle_options(argv, self.safemode.as_ref(), &self.flags, out)
    }

    /// Take the activation decision. Only the first call does any work.
    pub fn initialize<S: AsRef<str>>(&mut self, argv: &[S], env: &mut dyn Environment) -> Decision {
        if let Some(decision) = self.decision {
            return decision;
        }

        let gate = ActivationGate {
            settings: self.settings,
            flags: &self.flags,
            properties: self.properties.as_ref(),
            services: self.services.as_ref(),
            safemode: self.safemode.as_ref(),
            classpath: &self.classpath,
        };
        let decision = gate.decide(&self.context, argv, env);
        match decision {
            Decision::Abort(AbortReason::NotLauncher) | Decision::Proceed => {}
            Decision::Abort(reason) => debug!(%reason, "Hooking not activated"),
        }
        self.decision = Some(decision);
        decision
    }

    /// Runtime of this process, `None` when it cannot be identified.
    pub fn identify_runtime(&self) -> Option<RuntimeDescriptor> {
        match identify_runtime(&self.config.maps_path, &self.config.modules) {
            Ok(Some(descriptor)) => Some(descriptor),
            Ok(None) => {
                error!("Could not determine the managed runtime");
                None
            }
            Err(_) => None,
        }
    }

    /// Load and activate the hook module once the managed runtime exists.
    ///
    /// Returns `None` when hooking stays inactive for this process.
    pub fn on_runtime_created(&mut self, runtime: RuntimeHandle) -> Option<Activation> {
        if self.decision != Some(Decision::Proceed) {
            debug!("Activation was not granted, skipping module load");
            return None;
        }

        let descriptor = self.identify_runtime()?;
        let files = Some(self.files.clone());
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.loader
                .load_and_activate(&descriptor, &self.context, files, runtime)
        }));

        match result {
            Ok(Ok(activation)) => Some(activation),
            Ok(Err(e)) => {
                error!(runtime = %descriptor.kind, error = %e, "Hook module not loaded");
                None
            }
            Err(_) => {
                error!(runtime = %descriptor.kind, "Hook module loader panicked");
                None
            }
        }
    }
}

pub struct BootstrapBuilder {
    config: BootstrapConfig,
    role: ProcessRole,
    class_name: Option<String>,
    posture: Option<SecurityPosture>,
    files: Option<Arc<dyn FileAccess>>,
    properties: Option<Box<dyn PropertyStore>>,
    services: Option<Box<dyn ServiceSupervisor>>,
    safemode: Option<Box<dyn SafemodeTrigger>>,
    registry: Option<ModuleRegistry>,
}

impl BootstrapBuilder {
    /// Class started by a standalone tool. Ignored for launchers.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    /// Skip detection and use `posture`.
    pub fn posture(mut self, posture: SecurityPosture) -> Self {
        self.posture = Some(posture);
        self
    }

    /// Replace the file access used for flags and handed to hook modules.
    ///
    /// Defaults to the membrane client under an enforcing posture and to
    /// direct access otherwise.
    pub fn file_access(mut self, files: Arc<dyn FileAccess>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn properties(mut self, properties: impl PropertyStore + 'static) -> Self {
        self.properties = Some(Box::new(properties));
        self
    }

    pub fn services(mut self, services: impl ServiceSupervisor + 'static) -> Self {
        self.services = Some(Box::new(services));
        self
    }

    pub fn safemode(mut self, trigger: impl SafemodeTrigger + 'static) -> Self {
        self.safemode = Some(Box::new(trigger));
        self
    }

    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Bootstrap {
        let config = self.config;
        let settings = GateSettings::for_build(config.launcher_start_delay());
        // Turned-away processes stay silent and never read the posture.
        let excluded = settings.excludes(self.role);
        let posture = match self.posture {
            Some(posture) => posture,
            None if excluded => SecurityPosture::Disabled,
            None => SecurityPosture::detect(&config.enforce_path),
        };
        let class_name = self.class_name.filter(|_| !self.role.is_launcher());
        let context = SharedContext::new(self.role, posture, class_name);

        let files = self.files.unwrap_or_else(|| default_file_access(&config, posture));
        let flags = FlagStore::new(FlagPaths::in_dir(&config.conf_dir()), files.clone());
        let properties = self
            .properties
            .unwrap_or_else(|| Box::new(PropertyFiles::load(&config.property_files)));
        let services = self
            .services
            .unwrap_or_else(|| Box::new(CommandServices::new(config.services.clone())));
        let safemode = self
            .safemode
            .unwrap_or_else(|| safemode::from_command(&config.services.safemode_detector));
        let classpath = ClasspathInjector::new(&config.jar_path, config.classpath_max);
        let loader = ModuleLoader::new(self.registry.unwrap_or_default());

        if !excluded {
            info!(
                role = %context.role(),
                posture = %context.posture(),
                base_dir = %config.base_dir.display(),
                "Bootstrap configured"
            );
        }

        Bootstrap {
            config,
            settings,
            context,
            files,
            flags,
            properties,
            services,
            safemode,
            classpath,
            loader,
            decision: None,
        }
    }
}

fn default_file_access(config: &BootstrapConfig, posture: SecurityPosture) -> Arc<dyn FileAccess> {
    if posture.is_enforcing() {
        Arc::new(MembraneFileAccess::new(&config.services.membrane_socket))
    } else {
        Arc::new(DirectFileAccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::{HookModule, ModuleStrategy};
    use crate::membrane::tests::FakeMembrane;
    use crate::runtime::RuntimeKind;
    use crate::safemode::NeverTriggered;
    use std::collections::HashMap;
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    fn config(dir: &Path) -> BootstrapConfig {
        BootstrapConfig {
            base_dir: dir.to_path_buf(),
            jar_path: dir.join("bridge.jar"),
            launcher_start_delay_secs: 0,
            enforce_path: dir.join("enforce"),
            maps_path: dir.join("maps"),
            property_files: Vec::new(),
            ..Default::default()
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run `f` with every log event captured.
    fn captured_logs(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[cfg(not(feature = "enable-for-tools"))]
    #[test]
    fn restricted_build_turns_tools_away_silently() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bridge.jar"), b"PK").unwrap();
        std::fs::write(dir.path().join("enforce"), b"1").unwrap();

        let logs = captured_logs(|| {
            let mut bootstrap =
                Bootstrap::builder(config(dir.path()), ProcessRole::StandaloneTool)
                    .class_name("com.example.Tool")
                    .properties(HashMap::<String, String>::new())
                    .safemode(NeverTriggered)
                    .build();
            // The enforce file was never consulted.
            assert_eq!(bootstrap.context().posture(), SecurityPosture::Disabled);

            let mut env: HashMap<String, OsString> = HashMap::new();
            assert_eq!(
                bootstrap.initialize(&["Tool", "run"], &mut env),
                Decision::Abort(AbortReason::NotLauncher)
            );
            assert!(env.is_empty());
        });
        assert_eq!(logs, "");
    }

    #[test]
    fn launcher_logs_its_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let logs = captured_logs(|| {
            Bootstrap::builder(config(dir.path()), ProcessRole::LauncherHost)
                .posture(SecurityPosture::Disabled)
                .build();
        });
        assert!(logs.contains("Bootstrap configured"));
    }

    #[test]
    fn launcher_drops_class_name() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap::builder(config(dir.path()), ProcessRole::LauncherHost)
            .class_name("ignored")
            .posture(SecurityPosture::Permissive)
            .build();
        assert_eq!(bootstrap.context().class_name(), None);
        assert_eq!(bootstrap.context().posture(), SecurityPosture::Permissive);
        assert_eq!(bootstrap.decision(), None);
    }

    #[test]
    fn launcher_detects_the_posture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("enforce"), b"0\n").unwrap();
        let bootstrap = Bootstrap::builder(config(dir.path()), ProcessRole::LauncherHost).build();
        assert_eq!(bootstrap.context().posture(), SecurityPosture::Permissive);
    }

    struct ReadingStrategy {
        path: PathBuf,
        seen: Arc<Mutex<Option<Vec<u8>>>>,
    }

    struct ReadingModule {
        path: PathBuf,
        seen: Arc<Mutex<Option<Vec<u8>>>>,
    }

    impl ModuleStrategy for ReadingStrategy {
        fn load(&self, _: &RuntimeDescriptor) -> Result<Box<dyn HookModule>, LoadError> {
            Ok(Box::new(ReadingModule {
                path: self.path.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    impl HookModule for ReadingModule {
        fn initialize(&mut self, _: &SharedContext, files: Option<Arc<dyn FileAccess>>) -> bool {
            *self.seen.lock().unwrap() = files.and_then(|files| files.read(&self.path).ok());
            true
        }

        fn on_runtime_created(&mut self, _: RuntimeHandle) -> Result<(), LoadError> {
            Ok(())
        }
    }

    #[test]
    fn enforcing_posture_routes_file_access_through_the_membrane() {
        let membrane = FakeMembrane::spawn();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bridge.jar"), b"PK").unwrap();
        std::fs::write(
            dir.path().join("maps"),
            "7f00-7f10 r-xp 00000000 fd:00 1402   /system/lib64/libart.so\n",
        )
        .unwrap();
        let modules_list = dir.path().join("modules.list");
        std::fs::write(&modules_list, b"com.example.module\n").unwrap();

        let mut config = config(dir.path());
        config.services.membrane_socket = membrane.socket.clone();

        let seen = Arc::new(Mutex::new(None));
        let mut registry = ModuleRegistry::empty();
        registry.register(
            RuntimeKind::Art,
            ReadingStrategy {
                path: modules_list,
                seen: seen.clone(),
            },
        );

        let mut bootstrap = Bootstrap::builder(config, ProcessRole::LauncherHost)
            .posture(SecurityPosture::Enforcing)
            .properties(HashMap::<String, String>::new())
            .safemode(NeverTriggered)
            .registry(registry)
            .build();

        let mut env: HashMap<String, OsString> = HashMap::new();
        let args: [&str; 0] = [];
        assert_eq!(bootstrap.initialize(&args, &mut env), Decision::Proceed);
        // Flag checks went through the membrane too.
        let after_gate = membrane.request_count();
        assert!(after_gate >= 2);

        assert_eq!(
            bootstrap.on_runtime_created(RuntimeHandle::null()),
            Some(Activation::Active)
        );
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some(b"com.example.module\n".as_slice())
        );
        assert_eq!(membrane.request_count(), after_gate + 1);
    }
}
