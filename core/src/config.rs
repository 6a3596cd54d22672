//! Configuration loading and filesystem layout
//!
//! The engine reads a single YAML file (`config.yaml`) holding the API
//! surface settings, log rotation policy, and an optional bootstrap set of
//! process definitions. Every directory the engine touches can be
//! overridden through a `GEMSTONE_*` environment variable.
//!
//! A missing config file yields the defaults; a malformed one is a
//! [`CoreError::Config`] and aborts boot.

use crate::{CoreError, Result};
use schema::ProcessDefinition;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration directory
pub const DEFAULT_CONFIG_DIR: &str = "/etc/gemstone";
/// Default data directory (holds `processes.json`)
pub const DEFAULT_DATA_DIR: &str = "/var/lib/gemstone";
/// Default log directory
pub const DEFAULT_LOG_DIR: &str = "/var/log/gemstone";
/// Default Unix socket path
pub const DEFAULT_SOCKET_PATH: &str = "/run/gemstone/gemstone.sock";
/// Default control-plane port
pub const DEFAULT_API_PORT: u16 = 9876;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Control-plane settings
    pub api: ApiConfig,
    /// Log rotation policy
    pub logging: LogConfig,
    /// Optional bootstrap set of definitions seeded into the registry
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessDefinition>,
}

/// Control-plane surface settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Whether to serve the HTTP API at all
    pub enabled: bool,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Bearer token required on every request when non-empty
    pub auth_token: String,
    /// Permit cross-origin requests
    pub enable_cors: bool,
}

/// Log rotation policy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Rotate a log file once it exceeds this many megabytes
    pub max_size: u64,
    /// Retained rotated files per log (advisory)
    pub max_backups: u32,
    /// Retention age for rotated files in days (advisory)
    pub max_age: u32,
    /// Compress rotated files (advisory)
    pub compress: bool,
    /// Log directory; empty means the default (or `GEMSTONE_LOG`)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            logging: LogConfig::default(),
            processes: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_API_PORT,
            auth_token: String::new(),
            enable_cors: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_backups: 5,
            max_age: 30,
            compress: true,
            directory: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; unreadable or malformed YAML is
    /// a configuration error (boot aborts on it).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CoreError::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_yaml::from_str(&data)
            .map_err(|e| CoreError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Write configuration to `path`, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_yaml::to_string(self)
            .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Effective log directory: explicit config value, else the env/default
    pub fn log_dir(&self) -> PathBuf {
        if self.logging.directory.is_empty() {
            log_dir()
        } else {
            PathBuf::from(&self.logging.directory)
        }
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    match std::env::var(var) {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(default),
    }
}

/// Configuration file path (`GEMSTONE_CONFIG` override)
pub fn config_path() -> PathBuf {
    match std::env::var("GEMSTONE_CONFIG") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => Path::new(DEFAULT_CONFIG_DIR).join("config.yaml"),
    }
}

/// Data directory (`GEMSTONE_DATA` override)
pub fn data_dir() -> PathBuf {
    env_path("GEMSTONE_DATA", DEFAULT_DATA_DIR)
}

/// Log directory (`GEMSTONE_LOG` override)
pub fn log_dir() -> PathBuf {
    env_path("GEMSTONE_LOG", DEFAULT_LOG_DIR)
}

/// Unix socket path (`GEMSTONE_SOCKET` override)
pub fn socket_path() -> PathBuf {
    env_path("GEMSTONE_SOCKET", DEFAULT_SOCKET_PATH)
}
