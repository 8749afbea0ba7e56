// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! System properties, used for the diagnostic summary only.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::context::SharedContext;

/// Rendered for every property that cannot be read
pub const PLACEHOLDER: &str = "n/a";

pub trait PropertyStore {
    fn get(&self, key: &str) -> Option<String>;

    fn get_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(value) if !value.is_empty() => value,
            _ => {
                debug!(key, "Property not available");
                default.to_string()
            }
        }
    }
}

impl PropertyStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Properties parsed from `build.prop` style files.
///
/// Read-only properties keep their first definition, so files listed
/// earlier take precedence.
#[derive(Debug, Default, Clone)]
pub struct PropertyFiles {
    values: HashMap<String, String>,
}

impl PropertyFiles {
    /// Load every readable file; unreadable files are skipped.
    pub fn load(paths: &[PathBuf]) -> Self {
        let mut props = Self::default();
        for path in paths {
            match std::fs::read_to_string(path) {
                Ok(content) => props.parse(&content),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping property file"),
            }
        }
        props
    }

    pub fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            self.values
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
}

impl PropertyStore for PropertyFiles {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Device and build facts logged at every bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomInfo {
    pub release: String,
    pub sdk: String,
    pub manufacturer: String,
    pub model: String,
    pub display_id: String,
    pub fingerprint: String,
    pub cpu_abi: String,
}

impl RomInfo {
    pub fn collect(props: &dyn PropertyStore) -> Self {
        Self {
            release: props.get_or("ro.build.version.release", PLACEHOLDER),
            sdk: props.get_or("ro.build.version.sdk", PLACEHOLDER),
            manufacturer: props.get_or("ro.product.manufacturer", PLACEHOLDER),
            model: props.get_or("ro.product.model", PLACEHOLDER),
            display_id: props.get_or("ro.build.display.id", PLACEHOLDER),
            fingerprint: props.get_or("ro.build.fingerprint", PLACEHOLDER),
            cpu_abi: props.get_or("ro.product.cpu.abi", PLACEHOLDER),
        }
    }

    pub fn log(&self, context: &SharedContext) {
        let bits = usize::BITS;
        info!("-----------------");
        info!(
            "Starting hookstrap version {}, {}-bit binary",
            env!("CARGO_PKG_VERSION"),
            bits
        );
        info!(
            "Device: {} ({}), Android version {} (SDK {})",
            self.model, self.manufacturer, self.release, self.sdk
        );
        info!("ROM: {}", self.display_id);
        info!("Build fingerprint: {}", self.fingerprint);
        info!(
            "Platform: {}, role: {}",
            self.cpu_abi,
            context.role()
        );
        if !context.role().is_launcher() {
            info!("Class name: {}", context.class_name().unwrap_or(PLACEHOLDER));
        }
        info!(
            "MAC enabled: {}, enforcing: {}",
            yes_no(context.posture().is_enabled()),
            yes_no(context.posture().is_enforcing())
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
