// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! C ABI used by the runtime host binary.
//!
//! ```c
//! HookstrapHost *hs = hookstrap_new(zygote, start_system_server, class_name,
//!                                   argc, argv, NULL);
//! if (hs && hookstrap_handle_options(hs))
//!     return 0;
//! bool hooked = hs && hookstrap_initialize(hs, tool_argc, tool_argv);
//! /* ... start the managed runtime ... */
//! if (hooked)
//!     hookstrap_on_runtime_created(hs, runtime);
//! ```
//!
//! Every entry point accepts a NULL handle and none of them unwinds into the
//! caller.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Once;

use hs_bootstrap::error::CapabilityError;
use hs_bootstrap::{
    Activation, ArgumentSpan, Bootstrap, BootstrapConfig, OptionsOutcome, ProcessEnvironment,
    ProcessRole, RuntimeHandle,
};
use hs_logging::CliLoggingArgs;
use tracing::{error, warn};

const COMPONENT: &str = "hs-ffi";

pub const HOOKSTRAP_RENAMED: c_int = 0;
pub const HOOKSTRAP_RENAME_TRUNCATED: c_int = 1;
pub const HOOKSTRAP_RENAME_FAILED: c_int = -1;

static LOGGING: Once = Once::new();

/// Opaque per-process bootstrap state
pub struct HookstrapHost {
    bootstrap: Bootstrap,
    argv: Vec<String>,
    args: Option<ArgumentSpan>,
}

fn init_logging(config: &BootstrapConfig) {
    LOGGING.call_once(|| {
        let mut args = CliLoggingArgs::default();
        config.logging.apply_defaults(&mut args);
        // The host may already have installed a subscriber.
        let _ = args.init(COMPONENT);
    });
}

/// # Safety
///
/// `argv` must be NULL or hold `argc` valid C strings.
unsafe fn collect_args(argc: c_int, argv: *const *const c_char) -> Vec<String> {
    if argv.is_null() || argc <= 0 {
        return Vec::new();
    }
    (0..argc as usize)
        .map(|i| *argv.add(i))
        .take_while(|arg| !arg.is_null())
        .map(|arg| CStr::from_ptr(arg).to_string_lossy().into_owned())
        .collect()
}

/// # Safety
///
/// `s` must be NULL or a valid C string.
unsafe fn opt_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

fn guarded<T>(what: &str, default: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!(call = what, "Panic in bootstrap, hooking left inactive");
        default
    })
}

/// Create the bootstrap for this process.
///
/// `config_path` may be NULL to use `HOOKSTRAP_CONFIG` or the default
/// location. Returns NULL if the configuration cannot be loaded.
///
/// # Safety
///
/// `argv` must be the process's original argument vector: its memory is
/// later overwritten by [`hookstrap_set_process_name`]. `class_name` and
/// `config_path` must be NULL or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_new(
    zygote: bool,
    start_system_server: bool,
    class_name: *const c_char,
    argc: c_int,
    argv: *const *const c_char,
    config_path: *const c_char,
) -> *mut HookstrapHost {
    guarded("hookstrap_new", std::ptr::null_mut(), || {
        let config = match BootstrapConfig::load(opt_str(config_path).map(Path::new)) {
            Ok(config) => config,
            Err(e) => {
                init_logging(&BootstrapConfig::default());
                error!(error = %e, "Could not load bootstrap configuration");
                return std::ptr::null_mut();
            }
        };
        init_logging(&config);

        let argv_copy = collect_args(argc, argv);
        let args = ArgumentSpan::from_raw_argv(argc, argv);

        let mut builder =
            Bootstrap::builder(config, ProcessRole::from_flags(zygote, start_system_server));
        if let Some(name) = opt_str(class_name) {
            builder = builder.class_name(name);
        }

        Box::into_raw(Box::new(HookstrapHost {
            bootstrap: builder.build(),
            argv: argv_copy,
            args,
        }))
    })
}

/// Run a diagnostic option. `true` means it ran and the host should exit.
///
/// # Safety
///
/// `host` must be NULL or a live handle from [`hookstrap_new`].
#[no_mangle]
pub unsafe extern "C" fn hookstrap_handle_options(host: *mut HookstrapHost) -> bool {
    let Some(host) = host.as_ref() else {
        return false;
    };
    guarded("hookstrap_handle_options", false, || {
        let mut out = io::stdout().lock();
        match host.bootstrap.handle_options(host.argv.as_slice(), &mut out) {
            Ok(outcome) => {
                let _ = out.flush();
                outcome == OptionsOutcome::Handled
            }
            Err(e) => {
                warn!(error = %e, "Could not write diagnostic output");
                true
            }
        }
    })
}

/// Decide activation. `argv` are the target's arguments starting at the
/// command slot, used only for standalone tools.
///
/// # Safety
///
/// `host` must be NULL or a live handle; `argv` must be NULL or hold `argc`
/// valid C strings.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_initialize(
    host: *mut HookstrapHost,
    argc: c_int,
    argv: *const *const c_char,
) -> bool {
    let Some(host) = host.as_mut() else {
        return false;
    };
    let args = collect_args(argc, argv);
    guarded("hookstrap_initialize", false, || {
        host.bootstrap
            .initialize(args.as_slice(), &mut ProcessEnvironment)
            .is_proceed()
    })
}

/// Load the hook module once the managed runtime exists.
///
/// # Safety
///
/// `host` must be NULL or a live handle; `runtime` is passed to the module
/// unchanged.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_on_runtime_created(
    host: *mut HookstrapHost,
    runtime: *mut c_void,
) -> bool {
    let Some(host) = host.as_mut() else {
        return false;
    };
    let runtime = RuntimeHandle::from_raw(runtime);
    guarded("hookstrap_on_runtime_created", false, || {
        host.bootstrap.on_runtime_created(runtime) == Some(Activation::Active)
    })
}

/// Overwrite the argument memory captured by [`hookstrap_new`] with `name`.
///
/// # Safety
///
/// `host` must be NULL or a live handle; `name` must be NULL or a valid C
/// string.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_set_process_name(
    host: *mut HookstrapHost,
    name: *const c_char,
) -> c_int {
    let Some(host) = host.as_mut() else {
        return HOOKSTRAP_RENAME_FAILED;
    };
    let Some(name) = opt_str(name) else {
        return HOOKSTRAP_RENAME_FAILED;
    };
    guarded("hookstrap_set_process_name", HOOKSTRAP_RENAME_FAILED, || {
        let Some(args) = host.args.as_mut() else {
            warn!("No argument memory captured, cannot rename");
            return HOOKSTRAP_RENAME_FAILED;
        };
        match args.rename(name) {
            Ok(outcome) if outcome.truncated => HOOKSTRAP_RENAME_TRUNCATED,
            Ok(_) => HOOKSTRAP_RENAMED,
            Err(e) => {
                warn!(error = %e, "Rename failed");
                HOOKSTRAP_RENAME_FAILED
            }
        }
    })
}

/// Keep only the capabilities in `keep[0..len]`, stopping at the first
/// negative entry. Returns 0 or a negated `errno`.
///
/// # Safety
///
/// `keep` must be NULL or point to `len` readable values.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_drop_capabilities(keep: *const i8, len: usize) -> c_int {
    let keep = if keep.is_null() || len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(keep, len)
    };
    guarded("hookstrap_drop_capabilities", -libc::EIO, || {
        match hs_bootstrap::drop_capabilities(keep) {
            Ok(_) => 0,
            Err(CapabilityError::OutOfRange(_)) => -libc::EINVAL,
            Err(CapabilityError::Apply(errno)) => -(errno as c_int),
        }
    })
}

/// # Safety
///
/// `host` must be NULL or a handle from [`hookstrap_new`] not freed before.
#[no_mangle]
pub unsafe extern "C" fn hookstrap_free(host: *mut HookstrapHost) {
    if !host.is_null() {
        drop(Box::from_raw(host));
    }
}
