// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Makes the framework jar reachable by the managed runtime.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::unistd::AccessFlags;
use tracing::{error, info};

use crate::error::ClasspathError;

pub const CLASSPATH_VAR: &str = "CLASSPATH";

/// Process environment seen by the injector.
pub trait Environment {
    fn var(&self, key: &str) -> Option<OsString>;
    fn set_var(&mut self, key: &str, value: &OsStr);
}

/// The real environment of the current process
#[derive(Debug, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn set_var(&mut self, key: &str, value: &OsStr) {
        // Runs on the single bootstrap thread before any other thread exists.
        std::env::set_var(key, value);
    }
}

impl Environment for std::collections::HashMap<String, OsString> {
    fn var(&self, key: &str) -> Option<OsString> {
        self.get(key).cloned()
    }

    fn set_var(&mut self, key: &str, value: &OsStr) {
        self.insert(key.to_string(), value.to_os_string());
    }
}

/// `{jar}` when nothing is set, `{jar}:{existing}` otherwise.
///
/// The result must fit a buffer of `max` bytes including its terminator.
/// The limit holds when `CLASSPATH` is unset too, so a jar path of `max`
/// bytes or more is rejected on its own.
pub fn compose_classpath(
    jar: &OsStr,
    existing: Option<&OsStr>,
    max: usize,
) -> Result<OsString, ClasspathError> {
    let mut value = jar.to_os_string();
    if let Some(existing) = existing {
        value.push(":");
        value.push(existing);
    }

    let needed = value.as_bytes().len();
    if needed >= max {
        return Err(ClasspathError::TooLong { needed, max });
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct ClasspathInjector {
    jar_path: PathBuf,
    max: usize,
}

impl ClasspathInjector {
    pub fn new(jar_path: impl Into<PathBuf>, max: usize) -> Self {
        Self {
            jar_path: jar_path.into(),
            max,
        }
    }

    pub fn jar_path(&self) -> &Path {
        &self.jar_path
    }

    /// Prepend the jar to `CLASSPATH`, returning the new value.
    ///
    /// Nothing is written unless the jar is readable and the result fits,
    /// whether or not `CLASSPATH` was set before.
    pub fn inject(&self, env: &mut dyn Environment) -> Result<OsString, ClasspathError> {
        if let Err(source) = nix::unistd::access(self.jar_path.as_path(), AccessFlags::R_OK) {
            error!(
                jar = %self.jar_path.display(),
                error = %source,
                "Could not access framework jar"
            );
            return Err(ClasspathError::JarNotAccessible {
                path: self.jar_path.clone(),
                source,
            });
        }

        let existing = env.var(CLASSPATH_VAR);
        let value = compose_classpath(self.jar_path.as_os_str(), existing.as_deref(), self.max)
            .inspect_err(|e| error!(error = %e, "Refusing to extend CLASSPATH"))?;

        env.set_var(CLASSPATH_VAR, &value);
        info!(jar = %self.jar_path.display(), "Added framework jar to CLASSPATH");
        Ok(value)
    }
}
