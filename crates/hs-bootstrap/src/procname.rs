// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Rewriting of the visible process name.
//!
//! Process listings show the memory that originally held the command-line
//! arguments. Renaming overwrites that region in place, so the new name can
//! never be longer than the original arguments.

use std::ffi::{c_char, c_int, CString};
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug)]
enum Storage {
    /// Argument memory of the running process
    Process { start: NonNull<u8>, len: usize },
    Owned(Box<[u8]>),
}

/// Bounded, writable region holding the process arguments.
#[derive(Debug)]
pub struct ArgumentSpan {
    storage: Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameOutcome {
    /// Bytes of the name written to the span
    pub written: usize,
    pub truncated: bool,
    /// Whether the kernel's thread name was updated as well
    pub platform_notified: bool,
}

impl ArgumentSpan {
    /// Capture the argument region from the `argc`/`argv` the process was
    /// started with. The region runs from `argv[0]` to the terminator of
    /// the last argument.
    ///
    /// # Safety
    ///
    /// `argv` must be the process's original argument vector with `argc`
    /// valid entries, and nothing else may use that memory afterwards.
    pub unsafe fn from_raw_argv(argc: c_int, argv: *const *const c_char) -> Option<Self> {
        if argc <= 0 || argv.is_null() {
            return None;
        }
        let first = *argv;
        let last = *argv.add(argc as usize - 1);
        if first.is_null() || last.is_null() {
            return None;
        }

        // Addresses only: strings that are not one block may not even share
        // an allocation.
        let end = last as usize + libc::strlen(last) + 1;
        if end <= first as usize {
            return None;
        }
        let len = end - first as usize;
        let start = NonNull::new(first as *mut u8)?;
        Some(Self {
            storage: Storage::Process { start, len },
        })
    }

    pub fn from_buffer(buf: impl Into<Box<[u8]>>) -> Self {
        Self {
            storage: Storage::Owned(buf.into()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            // SAFETY: the region was exclusively handed over at capture.
            Storage::Process { start, len } => unsafe {
                std::slice::from_raw_parts(start.as_ptr(), *len)
            },
            Storage::Owned(buf) => buf,
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            // SAFETY: as above.
            Storage::Process { start, len } => unsafe {
                std::slice::from_raw_parts_mut(start.as_ptr(), *len)
            },
            Storage::Owned(buf) => buf,
        }
    }

    /// Zero the span and copy at most `capacity - 1` bytes of `name`.
    /// Returns the number of bytes written.
    pub fn write_name(&mut self, name: &[u8]) -> usize {
        let span = self.as_bytes_mut();
        span.fill(0);
        let n = name.len().min(span.len().saturating_sub(1));
        span[..n].copy_from_slice(&name[..n]);
        n
    }

    /// Rename the process.
    pub fn rename(&mut self, name: &str) -> Result<RenameOutcome> {
        let c_name = CString::new(name)
            .map_err(|_| Error::Rename(format!("name {:?} contains a NUL byte", name)))?;

        let written = self.write_name(c_name.as_bytes());
        let truncated = written < name.len();
        if truncated {
            warn!(
                name,
                capacity = self.capacity(),
                "Process name truncated to fit argument memory"
            );
        }

        let platform_notified = match nix::sys::prctl::set_name(&c_name) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not set thread name");
                false
            }
        };
        debug!(name, written, "Renamed process");

        Ok(RenameOutcome {
            written,
            truncated,
            platform_notified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_zero_padded() {
        let mut span = ArgumentSpan::from_buffer(b"app_process\0-Xzygote\0".to_vec());
        assert_eq!(span.write_name(b"zygote"), 6);
        assert_eq!(&span.as_bytes()[..7], b"zygote\0");
        assert!(span.as_bytes()[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_name_is_truncated_to_capacity_minus_one() {
        let mut span = ArgumentSpan::from_buffer(vec![b'x'; 8]);
        let outcome = span.rename("system_server").unwrap();
        assert_eq!(outcome.written, 7);
        assert!(outcome.truncated);
        assert_eq!(span.as_bytes(), b"system_\0");
    }

    #[test]
    fn short_name_is_not_truncated() {
        let mut span = ArgumentSpan::from_buffer(vec![b'x'; 32]);
        let outcome = span.rename("zygote64").unwrap();
        assert!(!outcome.truncated);
        assert_eq!(outcome.written, 8);
        assert_eq!(span.capacity(), 32);
    }

    #[test]
    fn empty_span_writes_nothing() {
        let mut span = ArgumentSpan::from_buffer(Vec::new());
        assert_eq!(span.write_name(b"name"), 0);
    }

    #[test]
    fn nul_in_name_is_rejected() {
        let mut span = ArgumentSpan::from_buffer(vec![b'x'; 16]);
        assert!(matches!(span.rename("a\0b"), Err(Error::Rename(_))));
        assert_eq!(span.as_bytes(), &[b'x'; 16][..]);
    }

    #[test]
    fn captures_contiguous_argv() {
        let mut block = b"host\0--zygote\0".to_vec();
        let base = block.as_mut_ptr() as *const c_char;
        let argv = [base, unsafe { base.add(5) }];

        let span = unsafe { ArgumentSpan::from_raw_argv(2, argv.as_ptr()) }.unwrap();
        assert_eq!(span.capacity(), block.len());
        assert_eq!(span.as_bytes(), b"host\0--zygote\0");

        assert!(unsafe { ArgumentSpan::from_raw_argv(0, argv.as_ptr()) }.is_none());
        assert!(unsafe { ArgumentSpan::from_raw_argv(1, std::ptr::null()) }.is_none());
    }

    #[test]
    fn argv_ending_before_it_starts_is_not_captured() {
        let block = b"host\0--zygote\0".to_vec();
        let base = block.as_ptr() as *const c_char;
        // Last argument sits wholly below the first one.
        let argv = [unsafe { base.add(5) }, base];

        assert!(unsafe { ArgumentSpan::from_raw_argv(2, argv.as_ptr()) }.is_none());
    }
}
