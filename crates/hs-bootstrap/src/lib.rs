// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bootstrap of the runtime-hooking framework inside a managed-runtime host.
//!
//! The host process (a launcher or a standalone tool started through the
//! same binary) hands control to [`Bootstrap`] before its managed runtime
//! starts. The [`gate`] decides whether hooking activates; when it does, the
//! [`runtime`] present in the process is identified and the matching native
//! hook module is loaded through the [`loader`]. [`caps`] and [`procname`]
//! are independent helpers used by the host around those steps.

pub mod abi;
pub mod bootstrap;
pub mod caps;
pub mod classpath;
pub mod config;
pub mod context;
pub mod error;
pub mod file_access;
pub mod flags;
pub mod gate;
pub mod loader;
pub mod membrane;
pub mod options;
pub mod posture;
pub mod procname;
pub mod props;
pub mod runtime;
pub mod safemode;
pub mod services;

pub use bootstrap::{Bootstrap, BootstrapBuilder};
pub use caps::{drop_capabilities, CapabilitySet};
pub use classpath::{ClasspathInjector, Environment, ProcessEnvironment};
pub use config::BootstrapConfig;
pub use context::{ProcessRole, SharedContext};
pub use error::{Error, Result};
pub use file_access::{DirectFileAccess, FileAccess};
pub use gate::{AbortReason, Decision};
pub use loader::{Activation, ModuleRegistry, RuntimeHandle};
pub use membrane::MembraneFileAccess;
pub use options::OptionsOutcome;
pub use posture::SecurityPosture;
pub use procname::{ArgumentSpan, RenameOutcome};
pub use runtime::{RuntimeDescriptor, RuntimeKind};
