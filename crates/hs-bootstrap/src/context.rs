// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process identity shared between the bootstrap and the hook module.

use std::fmt;

use crate::posture::SecurityPosture;

/// Role of the host process, fixed at startup from the caller's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Launcher (zygote) that does not start the system server
    LauncherHost,
    /// Launcher that also starts the system server
    SystemServerHost,
    /// Any other program started through the runtime host binary
    StandaloneTool,
}

impl ProcessRole {
    pub fn from_flags(zygote: bool, start_system_server: bool) -> Self {
        match (zygote, start_system_server) {
            (true, true) => ProcessRole::SystemServerHost,
            (true, false) => ProcessRole::LauncherHost,
            (false, _) => ProcessRole::StandaloneTool,
        }
    }

    /// Both launcher roles fork application processes.
    pub fn is_launcher(self) -> bool {
        !matches!(self, ProcessRole::StandaloneTool)
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::LauncherHost => write!(f, "launcher"),
            ProcessRole::SystemServerHost => write!(f, "launcher+system-server"),
            ProcessRole::StandaloneTool => write!(f, "tool"),
        }
    }
}

/// Per-process bootstrap state handed by reference to every later step.
///
/// Built once, never cloned and never sent to another process.
#[derive(Debug)]
pub struct SharedContext {
    role: ProcessRole,
    posture: SecurityPosture,
    class_name: Option<String>,
}

impl SharedContext {
    pub fn new(role: ProcessRole, posture: SecurityPosture, class_name: Option<String>) -> Self {
        Self {
            role,
            posture,
            class_name,
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn posture(&self) -> SecurityPosture {
        self.posture
    }

    /// Class started by a standalone tool; `None` for launchers.
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_flags() {
        assert_eq!(
            ProcessRole::from_flags(true, true),
            ProcessRole::SystemServerHost
        );
        assert_eq!(ProcessRole::from_flags(true, false), ProcessRole::LauncherHost);
        assert_eq!(
            ProcessRole::from_flags(false, true),
            ProcessRole::StandaloneTool
        );
        assert!(ProcessRole::SystemServerHost.is_launcher());
        assert!(ProcessRole::LauncherHost.is_launcher());
        assert!(!ProcessRole::StandaloneTool.is_launcher());
    }
}
