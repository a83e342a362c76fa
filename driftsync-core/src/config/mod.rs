//! Configuration management for driftsync
//!
//! Environment- and file-based configuration with defaults and
//! validation. Environment variables follow the pattern
//! `DRIFTSYNC_<SECTION>_<KEY>`.

use crate::task::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Engine behavior
    pub sync: EngineConfig,

    /// Retry behavior for remote operations
    pub retry: RetryPolicy,

    /// Local storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Engine behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Peer backlog at which a whole-store download replaces set replay
    pub backlog_threshold: u64,

    /// Freshness horizon after which a client counts as departed
    #[serde(with = "humantime_serde")]
    pub departed_after: Duration,

    /// Vacuum superseded change sets after each successful cycle
    pub auto_vacuum: bool,

    /// Polling interval for transports without native notifications
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for local change set and mark state
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync: EngineConfig::default(),
            retry: RetryPolicy::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: 50,
            departed_after: Duration::from_secs(30 * 24 * 3600),
            auto_vacuum: true,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./driftsync-data") }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false, with_target: true }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(threshold) = env::var("DRIFTSYNC_SYNC_BACKLOG_THRESHOLD") {
            config.sync.backlog_threshold = threshold.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid backlog threshold: {}", e))
            })?;
        }
        if let Ok(horizon) = env::var("DRIFTSYNC_SYNC_DEPARTED_AFTER") {
            config.sync.departed_after = humantime::parse_duration(&horizon).map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid departed horizon: {}", e))
            })?;
        }
        if let Ok(vacuum) = env::var("DRIFTSYNC_SYNC_AUTO_VACUUM") {
            config.sync.auto_vacuum = vacuum
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid vacuum flag: {}", e)))?;
        }
        if let Ok(attempts) = env::var("DRIFTSYNC_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid max attempts: {}", e)))?;
        }
        if let Ok(data_dir) = env::var("DRIFTSYNC_STORAGE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(level) = env::var("DRIFTSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("DRIFTSYNC_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.backlog_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "backlog_threshold must be greater than 0".to_string(),
            ));
        }
        if self.sync.departed_after.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "departed_after must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
