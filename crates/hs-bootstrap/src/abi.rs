// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! C ABI between the bootstrap and native hook modules.
//!
//! A module exports
//!
//! ```c
//! bool hookstrap_init_module(HookstrapContext *ctx);
//! void hookstrap_on_runtime_created(void *runtime);
//! ```
//!
//! `ctx` and everything it points to stay valid for the rest of the
//! process, so the module may keep the pointer. The file-access callbacks
//! are only present when the MAC policy is enforcing; otherwise all three
//! are NULL. Callbacks return `0` or a negated `errno`. Buffers returned by
//! `read` are allocated with `malloc` and owned by the caller.

use std::ffi::{c_char, c_int, c_void, CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use nix::unistd::AccessFlags;

use crate::context::{ProcessRole, SharedContext};
use crate::file_access::{FileAccess, FileStat};
use crate::posture::SecurityPosture;

pub const ABI_VERSION: u32 = 1;

pub const INIT_SYMBOL: &CStr = c"hookstrap_init_module";
pub const RUNTIME_CREATED_SYMBOL: &CStr = c"hookstrap_on_runtime_created";

pub const ROLE_LAUNCHER: u32 = 0;
pub const ROLE_SYSTEM_SERVER: u32 = 1;
pub const ROLE_TOOL: u32 = 2;

pub const POSTURE_DISABLED: u32 = 0;
pub const POSTURE_PERMISSIVE: u32 = 1;
pub const POSTURE_ENFORCING: u32 = 2;

pub type InitModuleFn = unsafe extern "C" fn(*mut HookstrapContext) -> bool;
pub type RuntimeCreatedFn = unsafe extern "C" fn(*mut c_void);

pub type AccessCallback = unsafe extern "C" fn(*const c_void, *const c_char, c_int) -> c_int;
pub type StatCallback =
    unsafe extern "C" fn(*const c_void, *const c_char, *mut HookstrapFileStat) -> c_int;
pub type ReadCallback =
    unsafe extern "C" fn(*const c_void, *const c_char, *mut usize) -> *mut c_char;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct HookstrapFileStat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

impl From<FileStat> for HookstrapFileStat {
    fn from(stat: FileStat) -> Self {
        Self {
            size: stat.size,
            mode: stat.mode,
            mtime: stat.mtime,
        }
    }
}

/// Privileged file access, passed back as the first argument of each callback.
#[repr(C)]
#[derive(Debug)]
pub struct HookstrapFileAccess {
    pub userdata: *const c_void,
    pub access: Option<AccessCallback>,
    pub stat: Option<StatCallback>,
    pub read: Option<ReadCallback>,
}

impl HookstrapFileAccess {
    fn absent() -> Self {
        Self {
            userdata: ptr::null(),
            access: None,
            stat: None,
            read: None,
        }
    }

    pub fn is_present(&self) -> bool {
        !self.userdata.is_null()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct HookstrapContext {
    pub abi_version: u32,
    pub role: u32,
    pub security_posture: u32,
    /// NUL-terminated class name for standalone tools, NULL for launchers
    pub start_class_name: *const c_char,
    pub file_access: HookstrapFileAccess,
}

/// Owner of a [`HookstrapContext`] and the memory it points into.
pub struct AbiContext {
    raw: Box<HookstrapContext>,
    _class_name: Option<CString>,
    _files: Option<Box<Arc<dyn FileAccess>>>,
}

impl AbiContext {
    pub fn new(context: &SharedContext, files: Option<Arc<dyn FileAccess>>) -> Self {
        let class_name = context.class_name().and_then(|name| CString::new(name).ok());
        let files = files.map(Box::new);

        let file_access = match &files {
            Some(boxed) => HookstrapFileAccess {
                userdata: &**boxed as *const Arc<dyn FileAccess> as *const c_void,
                access: Some(access_trampoline),
                stat: Some(stat_trampoline),
                read: Some(read_trampoline),
            },
            None => HookstrapFileAccess::absent(),
        };

        let raw = Box::new(HookstrapContext {
            abi_version: ABI_VERSION,
            role: role_code(context.role()),
            security_posture: posture_code(context.posture()),
            start_class_name: class_name.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            file_access,
        });

        Self {
            raw,
            _class_name: class_name,
            _files: files,
        }
    }

    pub fn raw(&self) -> &HookstrapContext {
        &self.raw
    }

    /// Hand the context to native code for the rest of the process.
    pub fn into_raw(self) -> *mut HookstrapContext {
        let this = Box::leak(Box::new(self));
        &mut *this.raw
    }
}

fn role_code(role: ProcessRole) -> u32 {
    match role {
        ProcessRole::LauncherHost => ROLE_LAUNCHER,
        ProcessRole::SystemServerHost => ROLE_SYSTEM_SERVER,
        ProcessRole::StandaloneTool => ROLE_TOOL,
    }
}

fn posture_code(posture: SecurityPosture) -> u32 {
    match posture {
        SecurityPosture::Disabled => POSTURE_DISABLED,
        SecurityPosture::Permissive => POSTURE_PERMISSIVE,
        SecurityPosture::Enforcing => POSTURE_ENFORCING,
    }
}

fn errno_of(err: &std::io::Error) -> c_int {
    -err.raw_os_error().unwrap_or(libc::EIO)
}

/// # Safety
///
/// `userdata` must come from an [`AbiContext`], `path` must be NULL or a
/// valid C string.
unsafe fn unpack<'a>(
    userdata: *const c_void,
    path: *const c_char,
) -> Option<(&'a Arc<dyn FileAccess>, &'a Path)> {
    if userdata.is_null() || path.is_null() {
        return None;
    }
    let files = &*(userdata as *const Arc<dyn FileAccess>);
    let path = Path::new(OsStr::from_bytes(CStr::from_ptr(path).to_bytes()));
    Some((files, path))
}

unsafe extern "C" fn access_trampoline(
    userdata: *const c_void,
    path: *const c_char,
    mode: c_int,
) -> c_int {
    catch_unwind(AssertUnwindSafe(|| {
        let Some((files, path)) = unpack(userdata, path) else {
            return -libc::EINVAL;
        };
        match files.access(path, AccessFlags::from_bits_truncate(mode)) {
            Ok(()) => 0,
            Err(e) => errno_of(&e),
        }
    }))
    .unwrap_or(-libc::EIO)
}

unsafe extern "C" fn stat_trampoline(
    userdata: *const c_void,
    path: *const c_char,
    out: *mut HookstrapFileStat,
) -> c_int {
    catch_unwind(AssertUnwindSafe(|| {
        let Some((files, path)) = unpack(userdata, path) else {
            return -libc::EINVAL;
        };
        if out.is_null() {
            return -libc::EINVAL;
        }
        match files.stat(path) {
            Ok(stat) => {
                *out = stat.into();
                0
            }
            Err(e) => errno_of(&e),
        }
    }))
    .unwrap_or(-libc::EIO)
}

unsafe extern "C" fn read_trampoline(
    userdata: *const c_void,
    path: *const c_char,
    out_len: *mut usize,
) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if !out_len.is_null() {
            *out_len = 0;
        }
        let Some((files, path)) = unpack(userdata, path) else {
            return ptr::null_mut();
        };
        let Ok(content) = files.read(path) else {
            return ptr::null_mut();
        };

        // One extra byte so text files can be used as C strings.
        let buf = libc::malloc(content.len() + 1) as *mut u8;
        if buf.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(content.as_ptr(), buf, content.len());
        *buf.add(content.len()) = 0;
        if !out_len.is_null() {
            *out_len = content.len();
        }
        buf as *mut c_char
    }))
    .unwrap_or(ptr::null_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_access::DirectFileAccess;

    fn tool_context() -> SharedContext {
        SharedContext::new(
            ProcessRole::StandaloneTool,
            SecurityPosture::Enforcing,
            Some("com.example.Tool".to_string()),
        )
    }

    #[test]
    fn context_fields_are_encoded() {
        let abi = AbiContext::new(&tool_context(), None);
        let raw = abi.raw();
        assert_eq!(raw.abi_version, ABI_VERSION);
        assert_eq!(raw.role, ROLE_TOOL);
        assert_eq!(raw.security_posture, POSTURE_ENFORCING);
        let name = unsafe { CStr::from_ptr(raw.start_class_name) };
        assert_eq!(name.to_str().unwrap(), "com.example.Tool");
        assert!(!raw.file_access.is_present());
        assert!(raw.file_access.access.is_none());
    }

    #[test]
    fn launcher_has_no_class_name() {
        let ctx = SharedContext::new(ProcessRole::LauncherHost, SecurityPosture::Disabled, None);
        let abi = AbiContext::new(&ctx, None);
        assert!(abi.raw().start_class_name.is_null());
        assert_eq!(abi.raw().role, ROLE_LAUNCHER);
    }

    #[test]
    fn callbacks_dispatch_to_file_access() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("modules.list");
        std::fs::write(&file, b"com.example.module\n").unwrap();
        let c_path = CString::new(file.as_os_str().as_bytes()).unwrap();
        let c_missing = CString::new(dir.path().join("nope").as_os_str().as_bytes()).unwrap();

        let abi = AbiContext::new(&tool_context(), Some(Arc::new(DirectFileAccess)));
        let fa = &abi.raw().file_access;
        assert!(fa.is_present());

        unsafe {
            let access = fa.access.unwrap();
            assert_eq!(access(fa.userdata, c_path.as_ptr(), libc::R_OK), 0);
            assert_eq!(
                access(fa.userdata, c_missing.as_ptr(), libc::F_OK),
                -libc::ENOENT
            );
            assert_eq!(access(fa.userdata, ptr::null(), libc::F_OK), -libc::EINVAL);

            let mut stat = HookstrapFileStat::default();
            assert_eq!((fa.stat.unwrap())(fa.userdata, c_path.as_ptr(), &mut stat), 0);
            assert_eq!(stat.size, 19);

            let mut len = 0usize;
            let buf = (fa.read.unwrap())(fa.userdata, c_path.as_ptr(), &mut len);
            assert!(!buf.is_null());
            assert_eq!(len, 19);
            assert_eq!(
                CStr::from_ptr(buf).to_bytes(),
                b"com.example.module\n"
            );
            libc::free(buf as *mut c_void);

            let buf = (fa.read.unwrap())(fa.userdata, c_missing.as_ptr(), &mut len);
            assert!(buf.is_null());
            assert_eq!(len, 0);
        }
    }
}
