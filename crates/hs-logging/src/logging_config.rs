// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging section of the bootstrap configuration file

use serde::{Deserialize, Serialize};

use crate::{CliLogLevel, LogFormat};

/// `[logging]` table of `hookstrap.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Logging verbosity level
    #[serde(rename = "log-level")]
    pub level: Option<CliLogLevel>,
    /// Output format
    pub format: Option<LogFormat>,
    /// Log file; stderr when unset
    pub file: Option<String>,
}

impl LoggingConfig {
    /// Fill CLI arguments that were not given on the command line.
    pub fn apply_defaults(&self, args: &mut crate::CliLoggingArgs) {
        if args.log_level.is_none() {
            args.log_level = self.level;
        }
        if args.log_format.is_none() {
            args.log_format = self.format;
        }
        if args.log_file.is_none() && args.log_dir.is_none() {
            args.log_file = self.file.clone();
        }
    }
}
