// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Safemode trigger: a user request, made during boot, to disable hooking.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

pub trait SafemodeTrigger {
    /// Whether the trigger condition is met. `skip_delay` asks the detector
    /// not to wait for user input.
    fn detect(&self, skip_delay: bool) -> bool;
}

/// Used when no detector is installed on the device.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverTriggered;

impl SafemodeTrigger for NeverTriggered {
    fn detect(&self, _skip_delay: bool) -> bool {
        false
    }
}

/// Runs an external detector, exit status 0 meaning "triggered".
///
/// `--skip-delay` is appended when the delay should be skipped.
#[derive(Debug, Clone)]
pub struct CommandTrigger {
    command: Vec<String>,
}

impl CommandTrigger {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl SafemodeTrigger for CommandTrigger {
    fn detect(&self, skip_delay: bool) -> bool {
        let Some((program, args)) = self.command.split_first() else {
            return false;
        };

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
        if skip_delay {
            cmd.arg("--skip-delay");
        }

        match cmd.status() {
            Ok(status) => {
                debug!(%status, "Safemode detector finished");
                status.success()
            }
            Err(e) => {
                warn!(program = %program, error = %e, "Could not run safemode detector");
                false
            }
        }
    }
}

/// Pick the detector for a configured command line.
pub fn from_command(command: &[String]) -> Box<dyn SafemodeTrigger> {
    if command.is_empty() {
        Box::new(NeverTriggered)
    } else {
        Box::new(CommandTrigger::new(command.to_vec()))
    }
}
