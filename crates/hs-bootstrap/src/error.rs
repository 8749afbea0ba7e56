// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the bootstrap subsystem.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::RuntimeKind;
use crate::services::ServiceTier;

/// Errors of the operations that report to their caller directly.
///
/// The activation steps keep their narrower error types below; each of
/// those ends in a [`crate::gate::AbortReason`] rather than an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process rename failed: {0}")]
    Rename(String),
}

/// Failures of the `CLASSPATH` injection. The environment is never touched
/// when one of these is returned.
#[derive(Error, Debug)]
pub enum ClasspathError {
    #[error("Could not access framework jar {path:?}: {source}")]
    JarNotAccessible {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("CLASSPATH would need {needed} bytes, limit is {max}")]
    TooLong { needed: usize, max: usize },
}

/// Failures to start one of the privileged helper services
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to spawn {tier} service {program:?}: {source}")]
    Spawn {
        tier: ServiceTier,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tier} service exited during startup with {status}")]
    Exited {
        tier: ServiceTier,
        status: std::process::ExitStatus,
    },
}

/// Typed results of loading and activating a hook module
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No module strategy registered for {0}")]
    NoStrategy(RuntimeKind),

    #[error("Invalid module path {0:?}")]
    InvalidPath(PathBuf),

    #[error("Could not load {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Symbol {symbol} not found in {path:?}")]
    MissingSymbol { path: PathBuf, symbol: String },

    #[error("Hook module panicked during {0}")]
    Panicked(&'static str),
}

/// Failures of the capability limiter
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Capability id {0} is out of range")]
    OutOfRange(i8),

    #[error("capset failed: {0}")]
    Apply(#[source] nix::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
