// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Startup of the privileged helper services.
//!
//! The services themselves (log capture, the full service tier of the
//! system server host and the membrane used by sandboxed hook modules) are
//! separate processes. A started service is watched for a short startup
//! window: one that exits with a failure status inside the window never
//! came up. Services that outlive the window are kept and reaped once they
//! exit, so the long-lived host never accumulates zombies.

use std::fmt;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ServiceCommands;
use crate::error::ServiceError;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceTier {
    LogCapture,
    Full,
    Membrane,
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceTier::LogCapture => write!(f, "log-capture"),
            ServiceTier::Full => write!(f, "full"),
            ServiceTier::Membrane => write!(f, "membrane"),
        }
    }
}

pub trait ServiceSupervisor {
    fn start(&self, tier: ServiceTier) -> Result<(), ServiceError>;
}

/// Spawns each tier from its configured command line and keeps the child
/// handles until they can be reaped.
#[derive(Debug, Default)]
pub struct CommandServices {
    commands: ServiceCommands,
    startup_window: Duration,
    running: Mutex<Vec<(ServiceTier, Child)>>,
}

impl CommandServices {
    pub fn new(commands: ServiceCommands) -> Self {
        let startup_window = commands.startup_window();
        Self {
            commands,
            startup_window,
            running: Mutex::new(Vec::new()),
        }
    }

    /// Override how long a fresh service is watched for an early exit.
    pub fn with_startup_window(mut self, window: Duration) -> Self {
        self.startup_window = window;
        self
    }

    /// Reap exited services and return the tiers still running.
    pub fn running(&self) -> Vec<ServiceTier> {
        let mut running = self.lock_running();
        running.retain_mut(|(tier, child)| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(%tier, pid = child.id(), %status, "Service exited");
                false
            }
            Err(e) => {
                warn!(%tier, pid = child.id(), error = %e, "Could not query service");
                true
            }
        });
        running.iter().map(|(tier, _)| *tier).collect()
    }

    fn command_for(&self, tier: ServiceTier) -> &[String] {
        match tier {
            ServiceTier::LogCapture => &self.commands.log_capture,
            ServiceTier::Full => &self.commands.full,
            ServiceTier::Membrane => &self.commands.membrane,
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Vec<(ServiceTier, Child)>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Watch `child` until it exits or the startup window closes.
    fn await_startup(&self, tier: ServiceTier, mut child: Child) -> Result<(), ServiceError> {
        let deadline = Instant::now() + self.startup_window;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    // Daemonizing services exit 0 once the daemon runs.
                    debug!(%tier, "Service launcher exited after startup");
                    return Ok(());
                }
                Ok(Some(status)) => return Err(ServiceError::Exited { tier, status }),
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(STARTUP_POLL_INTERVAL),
                Err(e) => {
                    warn!(%tier, error = %e, "Could not query service during startup");
                    break;
                }
            }
        }

        info!(%tier, pid = child.id(), "Started service");
        self.lock_running().push((tier, child));
        Ok(())
    }
}

impl ServiceSupervisor for CommandServices {
    fn start(&self, tier: ServiceTier) -> Result<(), ServiceError> {
        // Every start is also a chance to collect services that died since.
        self.running();

        let Some((program, args)) = self.command_for(tier).split_first() else {
            debug!(%tier, "No command configured, service provided by the platform");
            return Ok(());
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                tier,
                program: program.clone(),
                source,
            })?;

        self.await_startup(tier, child)
    }
}

impl Drop for CommandServices {
    fn drop(&mut self) {
        self.running();
    }
}
