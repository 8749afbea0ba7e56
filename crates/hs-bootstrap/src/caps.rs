// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reduction of the process capability sets to a keep-list.

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::error::CapabilityError;

const CAPABILITY_VERSION_3: u32 = 0x2008_0522;
const CAPABILITY_WORDS: usize = 2;

/// Highest capability id representable in the two-word set
pub const MAX_CAPABILITY: i8 = 63;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CapUserData {
    pub effective: u32,
    pub permitted: u32,
    pub inheritable: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    words: [u32; CAPABILITY_WORDS],
}

impl CapabilitySet {
    /// Build a set from `keep`, stopping at the first negative id.
    pub fn from_keep_list(keep: &[i8]) -> Result<Self, CapabilityError> {
        let mut set = Self::default();
        for &cap in keep.iter().take_while(|&&cap| cap >= 0) {
            if cap > MAX_CAPABILITY {
                return Err(CapabilityError::OutOfRange(cap));
            }
            let cap = cap as usize;
            set.words[cap / 32] |= 1 << (cap % 32);
        }
        Ok(set)
    }

    pub fn contains(&self, cap: u8) -> bool {
        let cap = cap as usize;
        cap < CAPABILITY_WORDS * 32 && self.words[cap / 32] & (1 << (cap % 32)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// `capset(2)` payload with effective, permitted and inheritable equal
    pub fn user_data(&self) -> [CapUserData; CAPABILITY_WORDS] {
        self.words.map(|word| CapUserData {
            effective: word,
            permitted: word,
            inheritable: word,
        })
    }

    /// Replace the capability sets of the calling thread.
    pub fn apply(&self) -> Result<(), CapabilityError> {
        let mut header = CapUserHeader {
            version: CAPABILITY_VERSION_3,
            pid: 0,
        };
        let data = self.user_data();

        // SAFETY: header and data match the v3 layout expected by the kernel.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_capset,
                &mut header as *mut CapUserHeader,
                data.as_ptr(),
            )
        };
        if rc != 0 {
            return Err(CapabilityError::Apply(Errno::last()));
        }
        Ok(())
    }
}

/// Drop every capability not named in `keep`.
pub fn drop_capabilities(keep: &[i8]) -> Result<CapabilitySet, CapabilityError> {
    let set = CapabilitySet::from_keep_list(keep)?;
    set.apply().inspect_err(|e| warn!(error = %e, "Failed to drop capabilities"))?;
    debug!(?set, "Dropped capabilities");
    Ok(set)
}
