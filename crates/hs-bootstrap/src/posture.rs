// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mandatory access control posture of the device.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityPosture {
    Disabled,
    Permissive,
    Enforcing,
}

impl SecurityPosture {
    /// Derive the posture from the SELinux `enforce` status file.
    ///
    /// A missing or unreadable file means the subsystem is unavailable and
    /// is reported as [`SecurityPosture::Disabled`].
    pub fn detect(enforce_path: &Path) -> Self {
        match std::fs::read_to_string(enforce_path) {
            Ok(content) => Self::from_enforce_value(&content),
            Err(e) => {
                debug!(path = %enforce_path.display(), error = %e, "MAC subsystem unavailable");
                SecurityPosture::Disabled
            }
        }
    }

    fn from_enforce_value(value: &str) -> Self {
        match value.trim() {
            "1" => SecurityPosture::Enforcing,
            "0" => SecurityPosture::Permissive,
            other => {
                warn!(value = other, "Unexpected enforce value, treating MAC as disabled");
                SecurityPosture::Disabled
            }
        }
    }

    pub fn is_enabled(self) -> bool {
        self != SecurityPosture::Disabled
    }

    pub fn is_enforcing(self) -> bool {
        self == SecurityPosture::Enforcing
    }
}

impl fmt::Display for SecurityPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPosture::Disabled => write!(f, "disabled"),
            SecurityPosture::Permissive => write!(f, "permissive"),
            SecurityPosture::Enforcing => write!(f, "enforcing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_enforce_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enforce");

        std::fs::write(&path, "1").unwrap();
        assert_eq!(SecurityPosture::detect(&path), SecurityPosture::Enforcing);

        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(SecurityPosture::detect(&path), SecurityPosture::Permissive);

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(SecurityPosture::detect(&path), SecurityPosture::Disabled);
    }

    #[test]
    fn missing_subsystem_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let posture = SecurityPosture::detect(&dir.path().join("absent"));
        assert_eq!(posture, SecurityPosture::Disabled);
        assert!(!posture.is_enabled());
        assert!(!posture.is_enforcing());
    }
}
