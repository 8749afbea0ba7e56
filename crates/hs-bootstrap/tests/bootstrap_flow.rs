// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end bootstrap runs against a temporary base directory.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use hs_bootstrap::classpath::CLASSPATH_VAR;
use hs_bootstrap::config::ServiceCommands;
use hs_bootstrap::error::{LoadError, ServiceError};
use hs_bootstrap::loader::{HookModule, ModuleStrategy};
use hs_bootstrap::safemode::{NeverTriggered, SafemodeTrigger};
use hs_bootstrap::services::{CommandServices, ServiceSupervisor, ServiceTier};
use hs_bootstrap::{
    AbortReason, Activation, Bootstrap, BootstrapConfig, Decision, FileAccess, ModuleRegistry,
    OptionsOutcome, ProcessRole, RuntimeDescriptor, RuntimeHandle, RuntimeKind, SecurityPosture,
    SharedContext,
};

const ART_MAPS: &str = "\
7f7e9c8000-7f7ea2c000 r-xp 00000000 fd:00 1391   /system/lib64/libc.so
7f7ea40000-7f7ee6c000 r-xp 00000000 fd:00 1402   /system/lib64/libart.so
";

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join("bridge.jar"), b"PK").unwrap();
        std::fs::write(dir.path().join("maps"), ART_MAPS).unwrap();
        Self { dir }
    }

    fn config(&self) -> BootstrapConfig {
        let base = self.dir.path();
        BootstrapConfig {
            base_dir: base.to_path_buf(),
            jar_path: base.join("bridge.jar"),
            launcher_start_delay_secs: 0,
            enforce_path: base.join("enforce"),
            maps_path: base.join("maps"),
            property_files: Vec::new(),
            services: ServiceCommands {
                membrane_socket: base.join("membrane.sock"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn flag(&self, name: &str) -> PathBuf {
        self.dir.path().join("conf").join(name)
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Clone, Default)]
struct RecordingServices {
    started: Arc<Mutex<Vec<ServiceTier>>>,
    failing: Option<ServiceTier>,
}

impl ServiceSupervisor for RecordingServices {
    fn start(&self, tier: ServiceTier) -> Result<(), ServiceError> {
        self.started.lock().unwrap().push(tier);
        if self.failing == Some(tier) {
            return Err(ServiceError::Spawn {
                tier,
                program: "hs-service".to_string(),
                source: std::io::Error::other("refused"),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
struct CountingTrigger {
    result: bool,
    calls: Rc<Cell<u32>>,
}

impl SafemodeTrigger for CountingTrigger {
    fn detect(&self, _skip_delay: bool) -> bool {
        self.calls.set(self.calls.get() + 1);
        self.result
    }
}

#[derive(Default)]
struct ModuleLog {
    kind: Option<RuntimeKind>,
    had_files: Option<bool>,
    runtime: Option<usize>,
}

struct RecordingStrategy {
    log: Arc<Mutex<ModuleLog>>,
}

struct RecordingModule {
    log: Arc<Mutex<ModuleLog>>,
}

impl ModuleStrategy for RecordingStrategy {
    fn load(&self, descriptor: &RuntimeDescriptor) -> Result<Box<dyn HookModule>, LoadError> {
        self.log.lock().unwrap().kind = Some(descriptor.kind);
        Ok(Box::new(RecordingModule {
            log: self.log.clone(),
        }))
    }
}

impl HookModule for RecordingModule {
    fn initialize(&mut self, _context: &SharedContext, files: Option<Arc<dyn FileAccess>>) -> bool {
        self.log.lock().unwrap().had_files = Some(files.is_some());
        true
    }

    fn on_runtime_created(&mut self, runtime: RuntimeHandle) -> Result<(), LoadError> {
        self.log.lock().unwrap().runtime = Some(runtime.as_ptr() as usize);
        Ok(())
    }
}

fn recording_registry() -> (ModuleRegistry, Arc<Mutex<ModuleLog>>) {
    let log = Arc::new(Mutex::new(ModuleLog::default()));
    let mut registry = ModuleRegistry::empty();
    for kind in RuntimeKind::ALL {
        registry.register(kind, RecordingStrategy { log: log.clone() });
    }
    (registry, log)
}

fn env() -> HashMap<String, OsString> {
    HashMap::new()
}

#[test]
fn enforcing_launcher_activates_art_module() {
    let fx = Fixture::new();
    let services = RecordingServices::default();
    let (registry, log) = recording_registry();

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Enforcing)
        .properties(HashMap::<String, String>::new())
        .services(services.clone())
        .safemode(NeverTriggered)
        .registry(registry)
        .build();

    let mut env = env();
    let args: [&str; 0] = [];
    assert_eq!(bootstrap.initialize(&args, &mut env), Decision::Proceed);
    assert_eq!(*services.started.lock().unwrap(), vec![ServiceTier::Membrane]);
    assert_eq!(
        env.get(CLASSPATH_VAR).unwrap(),
        fx.path().join("bridge.jar").as_os_str()
    );

    let handle = unsafe { RuntimeHandle::from_raw(0xbeef as *mut std::ffi::c_void) };
    assert_eq!(bootstrap.on_runtime_created(handle), Some(Activation::Active));
    let log = log.lock().unwrap();
    assert_eq!(log.kind, Some(RuntimeKind::Art));
    assert_eq!(log.had_files, Some(true));
    assert_eq!(log.runtime, Some(0xbeef));
}

#[test]
fn permissive_launcher_withholds_file_access() {
    let fx = Fixture::new();
    let services = RecordingServices::default();
    let (registry, log) = recording_registry();

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Permissive)
        .properties(HashMap::<String, String>::new())
        .services(services.clone())
        .safemode(NeverTriggered)
        .registry(registry)
        .build();

    let args: [&str; 0] = [];
    assert!(bootstrap.initialize(&args, &mut env()).is_proceed());
    assert!(services.started.lock().unwrap().is_empty());
    assert_eq!(
        bootstrap.on_runtime_created(RuntimeHandle::null()),
        Some(Activation::Active)
    );
    assert_eq!(log.lock().unwrap().had_files, Some(false));
}

#[test]
fn safemode_trigger_disables_hooking_permanently() {
    let fx = Fixture::new();
    let calls = Rc::new(Cell::new(0));
    let trigger = CountingTrigger {
        result: true,
        calls: calls.clone(),
    };

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(trigger)
        .build();

    let mut env = env();
    let args: [&str; 0] = [];
    assert_eq!(
        bootstrap.initialize(&args, &mut env),
        Decision::Abort(AbortReason::HookingDisabled)
    );
    assert_eq!(calls.get(), 1);
    assert!(fx.flag("disabled").exists());
    assert!(env.is_empty());
    assert_eq!(bootstrap.on_runtime_created(RuntimeHandle::null()), None);

    // A later launch sees the flag even when the trigger is quiet.
    let mut next = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(NeverTriggered)
        .build();
    assert_eq!(
        next.initialize(&args, &mut env),
        Decision::Abort(AbortReason::HookingDisabled)
    );
}

#[test]
fn disabled_safemode_skips_the_trigger() {
    let fx = Fixture::new();
    std::fs::write(fx.flag("disable_safemode"), b"").unwrap();
    let calls = Rc::new(Cell::new(0));

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(CountingTrigger {
            result: true,
            calls: calls.clone(),
        })
        .build();

    let args: [&str; 0] = [];
    assert!(bootstrap.initialize(&args, &mut env()).is_proceed());
    assert_eq!(calls.get(), 0);
    assert!(!fx.flag("disabled").exists());
}

#[test]
fn system_server_host_requires_full_tier() {
    let fx = Fixture::new();
    let services = RecordingServices {
        failing: Some(ServiceTier::Full),
        ..Default::default()
    };

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::SystemServerHost)
        .posture(SecurityPosture::Enforcing)
        .properties(HashMap::<String, String>::new())
        .services(services.clone())
        .safemode(NeverTriggered)
        .build();

    let mut env = env();
    let args: [&str; 0] = [];
    assert_eq!(
        bootstrap.initialize(&args, &mut env),
        Decision::Abort(AbortReason::ServiceUnavailable(ServiceTier::Full))
    );
    assert_eq!(
        *services.started.lock().unwrap(),
        vec![ServiceTier::LogCapture, ServiceTier::Full]
    );
    assert!(env.is_empty());
}

#[test]
fn log_capture_failure_is_not_fatal() {
    let fx = Fixture::new();
    let services = RecordingServices {
        failing: Some(ServiceTier::LogCapture),
        ..Default::default()
    };

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::SystemServerHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(services)
        .safemode(NeverTriggered)
        .build();

    let args: [&str; 0] = [];
    assert!(bootstrap.initialize(&args, &mut env()).is_proceed());
}

#[test]
fn membrane_exiting_during_startup_aborts_activation() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.services.membrane = vec!["false".to_string()];
    let (registry, log) = recording_registry();

    let mut bootstrap = Bootstrap::builder(config.clone(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Enforcing)
        .properties(HashMap::<String, String>::new())
        .services(CommandServices::new(config.services.clone()))
        .safemode(NeverTriggered)
        .registry(registry)
        .build();

    let mut env = env();
    let args: [&str; 0] = [];
    assert_eq!(
        bootstrap.initialize(&args, &mut env),
        Decision::Abort(AbortReason::ServiceUnavailable(ServiceTier::Membrane))
    );
    assert!(env.is_empty());
    assert_eq!(bootstrap.on_runtime_created(RuntimeHandle::null()), None);
    assert_eq!(log.lock().unwrap().kind, None);
}

#[cfg(not(feature = "enable-for-tools"))]
#[test]
fn restricted_build_ignores_tools() {
    let fx = Fixture::new();
    let services = RecordingServices::default();
    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::StandaloneTool)
        .class_name("com.android.commands.am.Am")
        .properties(HashMap::<String, String>::new())
        .services(services.clone())
        .safemode(NeverTriggered)
        .build();

    let mut env = env();
    let ordinary = ["am", "broadcast", "-a", "x", "com.example.FooActivity"];
    assert_eq!(
        bootstrap.initialize(&ordinary, &mut env),
        Decision::Abort(AbortReason::NotLauncher)
    );
    assert!(services.started.lock().unwrap().is_empty());
    assert!(env.is_empty());
}

#[cfg(feature = "enable-for-tools")]
#[test]
fn tools_are_gated_by_the_suppression_heuristic() {
    let fx = Fixture::new();
    let config = fx.config();

    let build = || {
        Bootstrap::builder(config.clone(), ProcessRole::StandaloneTool)
            .class_name("com.android.commands.am.Am")
            .posture(SecurityPosture::Enforcing)
            .properties(HashMap::<String, String>::new())
            .services(RecordingServices::default())
            .safemode(CountingTrigger {
                result: true,
                calls: Rc::new(Cell::new(0)),
            })
            .build()
    };

    let mut env = env();
    let suppressed = ["am", "start", "-n", "x/.RequestActivity", "--user", "0"];
    assert_eq!(
        build().initialize(&suppressed, &mut env),
        Decision::Abort(AbortReason::SuppressedCommand)
    );
    assert!(env.is_empty());

    let ordinary = ["am", "broadcast", "-a", "x", "com.example.FooActivity"];
    assert_eq!(build().initialize(&ordinary, &mut env), Decision::Proceed);
    // The trigger is a launcher-only concern.
    assert!(!fx.flag("disabled").exists());
}

#[test]
fn missing_jar_aborts_without_touching_environment() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.path().join("bridge.jar")).unwrap();

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(NeverTriggered)
        .build();

    let mut env = env();
    env.insert(CLASSPATH_VAR.to_string(), OsString::from("X"));
    let args: [&str; 0] = [];
    assert_eq!(
        bootstrap.initialize(&args, &mut env),
        Decision::Abort(AbortReason::Classpath)
    );
    assert_eq!(env.get(CLASSPATH_VAR), Some(&OsString::from("X")));
}

#[test]
fn unknown_runtime_leaves_hooking_inactive() {
    let fx = Fixture::new();
    std::fs::write(fx.path().join("maps"), "00-01 r-xp 0 0 0 /system/lib/libc.so\n").unwrap();
    let (registry, log) = recording_registry();

    let mut bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(NeverTriggered)
        .registry(registry)
        .build();

    let args: [&str; 0] = [];
    assert!(bootstrap.initialize(&args, &mut env()).is_proceed());
    assert_eq!(bootstrap.on_runtime_created(RuntimeHandle::null()), None);
    assert_eq!(log.lock().unwrap().kind, None);
}

#[test]
fn native_module_load_failure_is_contained() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.modules.art = fx.path().join("libhookstrap_art.so");

    let mut bootstrap = Bootstrap::builder(config, ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .properties(HashMap::<String, String>::new())
        .services(RecordingServices::default())
        .safemode(NeverTriggered)
        .build();

    let args: [&str; 0] = [];
    assert!(bootstrap.initialize(&args, &mut env()).is_proceed());
    assert_eq!(bootstrap.on_runtime_created(RuntimeHandle::null()), None);
}

#[test]
fn diagnostic_options_short_circuit() {
    let fx = Fixture::new();
    let bootstrap = Bootstrap::builder(fx.config(), ProcessRole::LauncherHost)
        .posture(SecurityPosture::Disabled)
        .safemode(NeverTriggered)
        .build();

    let mut out = Vec::new();
    let outcome = bootstrap
        .handle_options(&["app_process", "--hookstrap-test-safemode"], &mut out)
        .unwrap();
    assert_eq!(outcome, OptionsOutcome::Handled);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Testing safemode trigger\nSafemode not triggered\n"
    );
    assert_eq!(bootstrap.decision(), None);
}
