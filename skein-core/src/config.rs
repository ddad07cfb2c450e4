//! Configuration types and loading.
//!
//! Configuration is a TOML document whose sections mirror the fabric's
//! subsystems; unspecified keys fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Errors raised while loading or validating configuration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document parsed but is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fabric-wide settings.
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Fabric-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Store subsystem settings (`broker.store.*` keys).
    #[serde(default)]
    pub store: StoreConfig,
}

/// Store subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Period between expiry scans on a master.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Default timeout for awaitable frontend requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Maximum number of out-of-order commands a clone buffers while it
    /// waits for a resync; overflow drops the oldest and forces a new
    /// resync.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Filesystem path for persistent backends.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            request_timeout: default_request_timeout(),
            command_buffer: default_command_buffer(),
            path: None,
        }
    }
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_buffer() -> usize {
    32
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.broker.store;
        if store.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "broker.store.tick-interval must be > 0".into(),
            ));
        }
        if store.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "broker.store.request-timeout must be > 0".into(),
            ));
        }
        if store.command_buffer == 0 {
            return Err(ConfigError::Invalid(
                "broker.store.command-buffer must be > 0".into(),
            ));
        }
        Ok(())
    }
}
