// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The activation decision, taken once per host process.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::classpath::{ClasspathInjector, Environment};
use crate::context::{ProcessRole, SharedContext};
use crate::flags::FlagStore;
use crate::props::{PropertyStore, RomInfo};
use crate::safemode::SafemodeTrigger;
use crate::services::{ServiceSupervisor, ServiceTier};

/// Command class whose broadcasts are checked for superuser traffic
pub const AM_CLASS: &str = "com.android.commands.am.Am";

const SUPERUSER_COMPONENTS: [&str; 2] = [
    "com.noshufou.android.su.RESULT",
    "eu.chainfire.supersu.NativeAccess",
];
const SUPERUSER_MARKERS: [&str; 3] = [".RequestActivity", ".NotifyActivity", ".SuReceiver"];
const USER_FLAG: &str = "--user";

/// Restricted builds only activate hooking in launcher processes. Fixed at
/// build time by the `enable-for-tools` feature.
pub const LAUNCHER_ONLY: bool = !cfg!(feature = "enable-for-tools");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Restricted build and the process is not a launcher
    NotLauncher,
    ServiceUnavailable(ServiceTier),
    HookingDisabled,
    SuppressedCommand,
    Classpath,
    /// The host could not drop its capabilities after a positive decision
    Capabilities,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NotLauncher => write!(f, "not a launcher process"),
            AbortReason::ServiceUnavailable(tier) => write!(f, "{tier} service unavailable"),
            AbortReason::HookingDisabled => write!(f, "hooking disabled by flag file"),
            AbortReason::SuppressedCommand => write!(f, "suppressed superuser command"),
            AbortReason::Classpath => write!(f, "classpath injection failed"),
            AbortReason::Capabilities => write!(f, "capabilities could not be dropped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Abort(AbortReason),
}

impl Decision {
    pub fn is_proceed(self) -> bool {
        self == Decision::Proceed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub launcher_only: bool,
    /// Best-effort desequencing of two launchers' log output, not a
    /// synchronization point
    pub launcher_start_delay: Duration,
}

impl GateSettings {
    /// Settings of this build.
    pub fn for_build(launcher_start_delay: Duration) -> Self {
        Self {
            launcher_only: LAUNCHER_ONLY,
            launcher_start_delay,
        }
    }

    /// Whether `role` is turned away before anything else happens. Such a
    /// process gets no posture detection and no log output.
    pub fn excludes(&self, role: ProcessRole) -> bool {
        self.launcher_only && !role.is_launcher()
    }
}

pub struct ActivationGate<'a> {
    pub settings: GateSettings,
    pub flags: &'a FlagStore,
    pub properties: &'a dyn PropertyStore,
    pub services: &'a dyn ServiceSupervisor,
    pub safemode: &'a dyn SafemodeTrigger,
    pub classpath: &'a ClasspathInjector,
}

impl ActivationGate<'_> {
    /// Decide whether hooking activates for this process.
    ///
    /// `argv` are the target's launch arguments starting at the command
    /// slot; they are only consulted for standalone tools.
    pub fn decide<S: AsRef<str>>(
        &self,
        context: &SharedContext,
        argv: &[S],
        env: &mut dyn Environment,
    ) -> Decision {
        let role = context.role();
        if self.settings.excludes(role) {
            return Decision::Abort(AbortReason::NotLauncher);
        }

        match role {
            ProcessRole::SystemServerHost => {
                if let Err(e) = self.services.start(ServiceTier::LogCapture) {
                    warn!(error = %e, "Log capture not available");
                }
            }
            ProcessRole::LauncherHost if !self.settings.launcher_start_delay.is_zero() => {
                debug!(
                    delay = ?self.settings.launcher_start_delay,
                    "Letting the primary launcher start first"
                );
                std::thread::sleep(self.settings.launcher_start_delay);
            }
            _ => {}
        }

        RomInfo::collect(self.properties).log(context);

        if let Some(tier) = required_tier(context) {
            if let Err(e) = self.services.start(tier) {
                error!(error = %e, "Required service did not start, hooking disabled");
                return Decision::Abort(AbortReason::ServiceUnavailable(tier));
            }
        }

        if role.is_launcher()
            && !self.flags.is_safemode_disabled()
            && self.safemode.detect(self.flags.should_skip_safemode_delay())
        {
            info!("Safemode triggered, disabling hooking");
            if let Err(e) = self.flags.disable_hooking() {
                error!(error = %e, "Could not create disable flag");
            }
        }

        if self.flags.is_hooking_disabled() {
            return Decision::Abort(AbortReason::HookingDisabled);
        }
        if !role.is_launcher() && is_suppressed_command(context.class_name(), argv) {
            return Decision::Abort(AbortReason::SuppressedCommand);
        }

        info!("-----------------");
        match self.classpath.inject(env) {
            Ok(_) => Decision::Proceed,
            Err(_) => Decision::Abort(AbortReason::Classpath),
        }
    }
}

fn required_tier(context: &SharedContext) -> Option<ServiceTier> {
    match context.role() {
        ProcessRole::SystemServerHost => Some(ServiceTier::Full),
        ProcessRole::LauncherHost if context.posture().is_enforcing() => {
            Some(ServiceTier::Membrane)
        }
        _ => None,
    }
}

/// Whether `argv` is one of the activity-manager invocations issued by
/// superuser tools on every privilege request.
///
/// Misses are harmless, a false match would silently disable hooking for a
/// legitimate command.
pub fn is_suppressed_command<S: AsRef<str>>(class_name: Option<&str>, argv: &[S]) -> bool {
    if argv.len() < 4 || class_name != Some(AM_CLASS) {
        return false;
    }
    if !matches!(argv[1].as_ref(), "broadcast" | "start") {
        return false;
    }

    let mut might_be_superuser = false;
    for arg in &argv[2..] {
        let arg: &str = arg.as_ref();
        if SUPERUSER_COMPONENTS.contains(&arg) {
            return true;
        }
        if might_be_superuser && arg == USER_FLAG {
            return true;
        }
        if let Some(dot) = arg.rfind('.') {
            if SUPERUSER_MARKERS.contains(&&arg[dot..]) {
                might_be_superuser = true;
            }
        }
    }
    false
}
