// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Detection of the managed runtime loaded into this process.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::ModulePaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Dalvik,
    Art,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 2] = [RuntimeKind::Dalvik, RuntimeKind::Art];

    /// Base name of the runtime's own shared library
    pub fn library_name(self) -> &'static str {
        match self {
            RuntimeKind::Dalvik => "libdvm.so",
            RuntimeKind::Art => "libart.so",
        }
    }

    fn from_library_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.library_name().as_bytes() == name)
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Dalvik => write!(f, "Dalvik"),
            RuntimeKind::Art => write!(f, "ART"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub kind: RuntimeKind,
    pub module_path: PathBuf,
}

impl RuntimeDescriptor {
    pub fn for_kind(kind: RuntimeKind, modules: &ModulePaths) -> Self {
        let module_path = match kind {
            RuntimeKind::Dalvik => modules.dalvik.clone(),
            RuntimeKind::Art => modules.art.clone(),
        };
        Self { kind, module_path }
    }
}

/// Identify the runtime from the mapped-file listing at `maps_path`.
///
/// `Ok(None)` when neither runtime library is mapped. The caller treats an
/// unreadable listing exactly like `Ok(None)`.
pub fn identify_runtime(
    maps_path: &Path,
    modules: &ModulePaths,
) -> io::Result<Option<RuntimeDescriptor>> {
    let file = File::open(maps_path).inspect_err(|e| {
        error!(path = %maps_path.display(), error = %e, "Could not open mapped-file listing");
    })?;
    identify_from_listing(BufReader::new(file), modules)
}

/// Scan a `/proc/<pid>/maps` style listing, first match wins.
pub fn identify_from_listing<R: BufRead>(
    reader: R,
    modules: &ModulePaths,
) -> io::Result<Option<RuntimeDescriptor>> {
    for line in reader.split(b'\n') {
        let line = line?;
        let Some(slash) = line.iter().rposition(|&b| b == b'/') else {
            continue;
        };

        if let Some(kind) = RuntimeKind::from_library_name(&line[slash + 1..]) {
            info!(runtime = %kind, "Detected runtime");
            return Ok(Some(RuntimeDescriptor::for_kind(kind, modules)));
        }
    }
    Ok(None)
}
