// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! File access capability handed to hook modules.
//!
//! Under an enforcing MAC policy a hook module runs with the privileges of
//! the application it is attached to and cannot open framework files
//! itself. The membrane service performs those accesses on its behalf; the
//! bootstrap only sees it through this trait.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

pub use nix::unistd::AccessFlags;

/// Subset of `stat(2)` exposed to hook modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

pub trait FileAccess: Send + Sync {
    /// `access(2)` semantics: `Ok` when every requested permission is granted.
    fn access(&self, path: &Path, mode: AccessFlags) -> io::Result<()>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool {
        self.access(path, AccessFlags::F_OK).is_ok()
    }
}

/// Accesses files with the privileges of the calling process.
///
/// Used by launchers when no membrane is needed and as the in-process
/// backend of the membrane itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectFileAccess;

impl FileAccess for DirectFileAccess {
    fn access(&self, path: &Path, mode: AccessFlags) -> io::Result<()> {
        nix::unistd::access(path, mode).map_err(io::Error::from)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat {
            size: meta.size(),
            mode: meta.mode(),
            mtime: meta.mtime(),
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_access_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        let files = DirectFileAccess;

        assert!(!files.exists(&file));
        let err = files.access(&file, AccessFlags::R_OK).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        std::fs::write(&file, b"abc").unwrap();
        assert!(files.exists(&file));
        assert_eq!(files.stat(&file).unwrap().size, 3);
        assert_eq!(files.read(&file).unwrap(), b"abc");
    }
}
