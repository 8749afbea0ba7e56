// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capture of the original argument vector.
//!
//! `std::env::args` only hands out copies; renaming the process needs the
//! memory the kernel placed the arguments in. glibc and bionic pass
//! `argc`/`argv` to `.init_array` constructors of the executable, which is
//! where the pointers are recorded.

use std::ffi::{c_char, c_int};
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

use hs_bootstrap::ArgumentSpan;

static ARGC: AtomicI32 = AtomicI32::new(0);
static ARGV: AtomicPtr<*const c_char> = AtomicPtr::new(std::ptr::null_mut());

#[cfg(any(target_os = "linux", target_os = "android"))]
#[used]
#[link_section = ".init_array"]
static CAPTURE_ARGV: extern "C" fn(c_int, *const *const c_char, *const *const c_char) =
    capture_argv;

#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
extern "C" fn capture_argv(argc: c_int, argv: *const *const c_char, _envp: *const *const c_char) {
    ARGC.store(argc, Ordering::Relaxed);
    ARGV.store(argv as *mut *const c_char, Ordering::Relaxed);
}

/// Take the argument memory. Returns `None` when it was not captured or has
/// already been taken.
pub fn take_argument_span() -> Option<ArgumentSpan> {
    let argv = ARGV.swap(std::ptr::null_mut(), Ordering::Relaxed);
    if argv.is_null() {
        return None;
    }
    // SAFETY: the pointers came from the loader and are taken only once.
    unsafe { ArgumentSpan::from_raw_argv(ARGC.load(Ordering::Relaxed), argv) }
}
