// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Loading and activation of the native hook module.

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::abi::{AbiContext, InitModuleFn, RuntimeCreatedFn, INIT_SYMBOL, RUNTIME_CREATED_SYMBOL};
use crate::context::SharedContext;
use crate::error::LoadError;
use crate::file_access::FileAccess;
use crate::runtime::{RuntimeDescriptor, RuntimeKind};

/// Opaque pointer to the managed runtime instance, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeHandle(*mut c_void);

impl RuntimeHandle {
    /// # Safety
    ///
    /// `ptr` must be whatever the runtime's creation callback expects.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

/// A loaded hook module for one runtime kind
pub trait HookModule {
    /// Run the module's entry point. `false` means the module declined.
    ///
    /// `files` is only `Some` under an enforcing MAC policy.
    fn initialize(&mut self, context: &SharedContext, files: Option<Arc<dyn FileAccess>>)
    -> bool;

    fn on_runtime_created(&mut self, runtime: RuntimeHandle) -> Result<(), LoadError>;
}

pub trait ModuleStrategy {
    fn load(&self, descriptor: &RuntimeDescriptor) -> Result<Box<dyn HookModule>, LoadError>;
}

/// Loads modules with the dynamic linker.
///
/// Libraries are never unloaded: the module installs hooks that outlive
/// every handle we could hold.
#[derive(Debug, Clone, Default)]
pub struct NativeModuleStrategy {
    path_override: Option<PathBuf>,
}

impl NativeModuleStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always load `path`, whatever the descriptor names.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path_override: Some(path.into()),
        }
    }
}

impl ModuleStrategy for NativeModuleStrategy {
    fn load(&self, descriptor: &RuntimeDescriptor) -> Result<Box<dyn HookModule>, LoadError> {
        let path = self
            .path_override
            .as_deref()
            .unwrap_or(descriptor.module_path.as_path());
        let library = NativeLibrary::open(path)?;
        let init = library.symbol(INIT_SYMBOL)?;
        debug!(path = %path.display(), "Resolved module entry point");

        Ok(Box::new(NativeModule {
            // SAFETY: symbol contract of the module ABI.
            init: unsafe { std::mem::transmute::<*mut c_void, InitModuleFn>(init) },
            library,
        }))
    }
}

struct NativeLibrary {
    handle: *mut c_void,
    path: PathBuf,
}

impl NativeLibrary {
    fn open(path: &Path) -> Result<Self, LoadError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LoadError::InvalidPath(path.to_path_buf()))?;

        // SAFETY: c_path is a valid C string.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                reason: last_dl_error(),
            });
        }
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn symbol(&self, name: &CStr) -> Result<*mut c_void, LoadError> {
        // SAFETY: handle came from dlopen and is never closed.
        let sym = unsafe {
            libc::dlerror();
            libc::dlsym(self.handle, name.as_ptr())
        };
        if sym.is_null() {
            return Err(LoadError::MissingSymbol {
                path: self.path.clone(),
                symbol: name.to_string_lossy().into_owned(),
            });
        }
        Ok(sym)
    }
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns NULL or a thread-local C string.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown dynamic linker error".to_string()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

struct NativeModule {
    library: NativeLibrary,
    init: InitModuleFn,
}

impl HookModule for NativeModule {
    fn initialize(
        &mut self,
        context: &SharedContext,
        files: Option<Arc<dyn FileAccess>>,
    ) -> bool {
        // The module may keep the context pointer.
        let raw = AbiContext::new(context, files).into_raw();
        // SAFETY: raw is a valid, leaked HookstrapContext.
        unsafe { (self.init)(raw) }
    }

    fn on_runtime_created(&mut self, runtime: RuntimeHandle) -> Result<(), LoadError> {
        let sym = self.library.symbol(RUNTIME_CREATED_SYMBOL)?;
        // SAFETY: symbol contract of the module ABI.
        let callback = unsafe { std::mem::transmute::<*mut c_void, RuntimeCreatedFn>(sym) };
        unsafe { callback(runtime.as_ptr()) };
        Ok(())
    }
}

/// Strategies keyed by runtime kind
pub struct ModuleRegistry {
    strategies: HashMap<RuntimeKind, Box<dyn ModuleStrategy>>,
}

impl ModuleRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Native loading for every kind, from the descriptor's module path.
    pub fn native() -> Self {
        let mut registry = Self::empty();
        for kind in RuntimeKind::ALL {
            registry.register(kind, NativeModuleStrategy::new());
        }
        registry
    }

    pub fn register(&mut self, kind: RuntimeKind, strategy: impl ModuleStrategy + 'static) {
        self.strategies.insert(kind, Box::new(strategy));
    }

    pub fn strategy(&self, kind: RuntimeKind) -> Option<&dyn ModuleStrategy> {
        self.strategies.get(&kind).map(|s| s.as_ref())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::native()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Entry point accepted and the runtime-created hook ran
    Active,
    /// Entry point returned `false`; nothing else was called
    Declined,
}

pub struct ModuleLoader {
    registry: ModuleRegistry,
}

impl ModuleLoader {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Load the module for `descriptor` and activate it for `runtime`.
    ///
    /// The file-access capability only reaches the module under an
    /// enforcing MAC policy. Panics raised by a strategy or module
    /// implemented in Rust are reported as [`LoadError::Panicked`].
    pub fn load_and_activate(
        &self,
        descriptor: &RuntimeDescriptor,
        context: &SharedContext,
        files: Option<Arc<dyn FileAccess>>,
        runtime: RuntimeHandle,
    ) -> Result<Activation, LoadError> {
        let strategy = self
            .registry
            .strategy(descriptor.kind)
            .ok_or(LoadError::NoStrategy(descriptor.kind))?;

        let mut module = catch_unwind(AssertUnwindSafe(|| strategy.load(descriptor)))
            .map_err(|_| LoadError::Panicked("load"))??;

        let files = files.filter(|_| context.posture().is_enforcing());
        let accepted = catch_unwind(AssertUnwindSafe(|| module.initialize(context, files)))
            .map_err(|_| LoadError::Panicked("initialize"))?;
        if !accepted {
            info!(runtime = %descriptor.kind, "Hook module declined to initialize");
            return Ok(Activation::Declined);
        }

        catch_unwind(AssertUnwindSafe(|| module.on_runtime_created(runtime)))
            .map_err(|_| LoadError::Panicked("on_runtime_created"))??;
        info!(runtime = %descriptor.kind, "Hook module active");
        Ok(Activation::Active)
    }
}
