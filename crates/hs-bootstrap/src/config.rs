// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bootstrap configuration.
//!
//! Every value has a built-in default matching the on-device layout, so a
//! missing configuration file is not an error. A file only overrides the
//! keys it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hs_logging::logging_config::LoggingConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "HOOKSTRAP_CONFIG";

/// Configuration file consulted when neither a path nor `HOOKSTRAP_CONFIG` is given
pub const DEFAULT_CONFIG_PATH: &str = "/system/etc/hookstrap.toml";

pub const DEFAULT_BASE_DIR: &str = "/data/hookstrap";
pub const DEFAULT_JAR_PATH: &str = "/system/framework/hookstrap-bridge.jar";
pub const DEFAULT_CLASSPATH_MAX: usize = 4096;
pub const DEFAULT_LAUNCHER_DELAY_SECS: u64 = 10;
pub const DEFAULT_ENFORCE_PATH: &str = "/sys/fs/selinux/enforce";
pub const DEFAULT_MAPS_PATH: &str = "/proc/self/maps";
pub const DEFAULT_MEMBRANE_SOCKET: &str = "/dev/socket/hookstrap_membrane";
pub const DEFAULT_STARTUP_WINDOW_MS: u64 = 250;

#[cfg(target_pointer_width = "64")]
const SYSTEM_LIB_DIR: &str = "/system/lib64";
#[cfg(not(target_pointer_width = "64"))]
const SYSTEM_LIB_DIR: &str = "/system/lib";

/// Native hook module to load per runtime kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModulePaths {
    pub dalvik: PathBuf,
    pub art: PathBuf,
}

impl Default for ModulePaths {
    fn default() -> Self {
        Self {
            dalvik: Path::new(SYSTEM_LIB_DIR).join("libhookstrap_dalvik.so"),
            art: Path::new(SYSTEM_LIB_DIR).join("libhookstrap_art.so"),
        }
    }
}

/// Command lines of the privileged helper services. An empty command means
/// the tier is provided by the platform and needs no spawning here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceCommands {
    pub log_capture: Vec<String>,
    pub full: Vec<String>,
    pub membrane: Vec<String>,
    /// Socket the membrane service answers file requests on
    pub membrane_socket: PathBuf,
    /// How long a freshly spawned service is watched for an early exit
    pub startup_window_ms: u64,
    /// External safemode detector; exit status 0 means "triggered"
    pub safemode_detector: Vec<String>,
}

impl Default for ServiceCommands {
    fn default() -> Self {
        Self {
            log_capture: Vec::new(),
            full: Vec::new(),
            membrane: Vec::new(),
            membrane_socket: PathBuf::from(DEFAULT_MEMBRANE_SOCKET),
            startup_window_ms: DEFAULT_STARTUP_WINDOW_MS,
            safemode_detector: Vec::new(),
        }
    }
}

impl ServiceCommands {
    pub fn startup_window(&self) -> Duration {
        Duration::from_millis(self.startup_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BootstrapConfig {
    /// Directory holding the `conf/` flag files
    pub base_dir: PathBuf,
    /// Framework jar prepended to `CLASSPATH`
    pub jar_path: PathBuf,
    /// `CLASSPATH` must stay strictly below this many bytes
    pub classpath_max: usize,
    /// Delay applied by a launcher that does not start the system server
    pub launcher_start_delay_secs: u64,
    /// MAC enforcement status file
    pub enforce_path: PathBuf,
    /// Mapped-file listing of the current process
    pub maps_path: PathBuf,
    /// Property files read for the diagnostic summary, earlier files win
    pub property_files: Vec<PathBuf>,
    pub modules: ModulePaths,
    pub services: ServiceCommands,
    pub logging: LoggingConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            jar_path: PathBuf::from(DEFAULT_JAR_PATH),
            classpath_max: DEFAULT_CLASSPATH_MAX,
            launcher_start_delay_secs: DEFAULT_LAUNCHER_DELAY_SECS,
            enforce_path: PathBuf::from(DEFAULT_ENFORCE_PATH),
            maps_path: PathBuf::from(DEFAULT_MAPS_PATH),
            property_files: vec![
                PathBuf::from("/default.prop"),
                PathBuf::from("/system/build.prop"),
                PathBuf::from("/vendor/build.prop"),
            ],
            modules: ModulePaths::default(),
            services: ServiceCommands::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BootstrapConfig {
    /// Load the configuration.
    ///
    /// An explicit `path` (or `HOOKSTRAP_CONFIG`) must exist; the default
    /// location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match explicit {
            Some(path) => Self::read_from_file(&path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::read_from_file(default)
                } else {
                    debug!("No configuration file, using built-in defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {:?}: {}", path, e)))?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("parsing {:?}: {}", path, e)))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn launcher_start_delay(&self) -> Duration {
        Duration::from_secs(self.launcher_start_delay_secs)
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.base_dir.join("conf")
    }
}
