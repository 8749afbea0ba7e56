// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Presence-only flag files.
//!
//! Only the existence of a flag file matters, its content is never read.
//! Flags are the sole channel between processes: a launcher that detects the
//! safemode trigger creates `disabled`, and every later launch sees it until
//! somebody removes it by hand.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::file_access::FileAccess;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPaths {
    pub disable_hooking: PathBuf,
    pub disable_safemode: PathBuf,
    pub skip_safemode_delay: PathBuf,
}

impl FlagPaths {
    pub fn in_dir(conf_dir: &Path) -> Self {
        Self {
            disable_hooking: conf_dir.join("disabled"),
            disable_safemode: conf_dir.join("disable_safemode"),
            skip_safemode_delay: conf_dir.join("safemode_nodelay"),
        }
    }
}

/// Reads and creates flag files.
///
/// Existence checks go through the [`FileAccess`] capability so that they
/// keep working when the caller cannot see the configuration directory
/// directly.
pub struct FlagStore {
    paths: FlagPaths,
    files: Arc<dyn FileAccess>,
}

impl FlagStore {
    pub fn new(paths: FlagPaths, files: Arc<dyn FileAccess>) -> Self {
        Self { paths, files }
    }

    pub fn paths(&self) -> &FlagPaths {
        &self.paths
    }

    pub fn is_hooking_disabled(&self) -> bool {
        let disabled = self.files.exists(&self.paths.disable_hooking);
        if disabled {
            error!(
                path = %self.paths.disable_hooking.display(),
                "Found disable flag, not loading hooks"
            );
        }
        disabled
    }

    pub fn is_safemode_disabled(&self) -> bool {
        self.files.exists(&self.paths.disable_safemode)
    }

    pub fn should_skip_safemode_delay(&self) -> bool {
        self.files.exists(&self.paths.skip_safemode_delay)
    }

    /// Create the disable flag. Creating an existing flag is a no-op.
    pub fn disable_hooking(&self) -> io::Result<()> {
        touch(&self.paths.disable_hooking)?;
        info!(
            path = %self.paths.disable_hooking.display(),
            "Hooking disabled for future launches"
        );
        Ok(())
    }
}

fn touch(path: &Path) -> io::Result<()> {
    OpenOptions::new().write(true).create(true).mode(0o600).open(path)?;
    Ok(())
}
