//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars, parse_duration};
use crate::events::{DEFAULT_QUEUE_DEPTH, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::loop_buffer::DEFAULT_LOOP_CAPACITY;
use crate::station::{DEFAULT_NULL_INTERVAL, NULL_DEVICE};
use crate::storage::DEFAULT_CHANNEL_CAPACITY;

// =============================================================================
// Constants
// =============================================================================

/// Default archive database file.
pub const DEFAULT_DB_PATH: &str = "weather.db";

/// Samples required before `/loop` serves data.
pub const DEFAULT_MIN_SAMPLES: usize = 3;

/// Age beyond which the newest loop sample is considered stale (5 minutes).
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(5 * 60);

fn default_checkpoint_interval() -> String {
    "5s".to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path, or `:memory:`.
    pub path: String,

    /// Writer channel capacity (default: 1024).
    pub channel_capacity: usize,

    /// WAL checkpoint interval (default: "5s").
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: String,
}

impl DatabaseConfig {
    /// Parsed checkpoint interval.
    pub fn checkpoint_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.checkpoint_interval).map_err(|e| {
            ConfigError::ValidationError(format!("database checkpoint_interval: {}", e))
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

// =============================================================================
// Station Configuration
// =============================================================================

/// Station driver selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Serial device of the console, or `/dev/null` for the null station.
    pub device: String,

    /// Sample interval of the null station (default: 2s).
    #[serde(with = "humantime_serde")]
    pub null_interval: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            device: NULL_DEVICE.to_string(),
            null_interval: DEFAULT_NULL_INTERVAL,
        }
    }
}

// =============================================================================
// Loop Buffer Configuration
// =============================================================================

/// Recent-sample buffer and `/loop` freshness rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopBufferConfig {
    /// Samples retained (default: 270).
    pub capacity: usize,

    /// Samples required before `/loop` answers (default: 3).
    pub min_samples: usize,

    /// Newest-sample age at which `/loop` reports stale data (default: 5m).
    #[serde(with = "humantime_serde")]
    pub stale_age: Duration,
}

impl Default for LoopBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOOP_CAPACITY,
            min_samples: DEFAULT_MIN_SAMPLES,
            stale_age: DEFAULT_STALE_AGE,
        }
    }
}

// =============================================================================
// Broker Configuration
// =============================================================================

/// Event broker sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Publish queue depth (default: 8).
    pub queue_depth: usize,

    /// Per-subscriber channel capacity (default: 8).
    pub subscriber_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Station driver configuration.
    pub station: StationConfig,

    /// Loop buffer configuration.
    pub loop_buffer: LoopBufferConfig,

    /// Event broker configuration.
    pub broker: BrokerConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database path must not be empty".to_string(),
            ));
        }

        // Validate channel capacity
        if self.database.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "database channel_capacity must be positive".to_string(),
            ));
        }

        // Validate checkpoint interval
        self.database.checkpoint_interval()?;

        if self.station.device.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "station device must not be empty".to_string(),
            ));
        }

        if self.station.null_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "station null_interval must be positive".to_string(),
            ));
        }

        if self.loop_buffer.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "loop_buffer capacity must be positive".to_string(),
            ));
        }

        if self.loop_buffer.min_samples > self.loop_buffer.capacity {
            return Err(ConfigError::ValidationError(format!(
                "loop_buffer min_samples ({}) exceeds capacity ({})",
                self.loop_buffer.min_samples, self.loop_buffer.capacity
            )));
        }

        if self.broker.queue_depth == 0 || self.broker.subscriber_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "broker queue_depth and subscriber_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
