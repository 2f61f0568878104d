//! Configuration module for the weather station service.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (path, channel capacity, checkpoint interval)
//! - Station device selection
//! - Loop buffer and event broker sizing

mod app;
mod validation;

pub use app::{
    AppConfig, BrokerConfig, DatabaseConfig, LoopBufferConfig, ServerConfig, StationConfig,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_DB_PATH, DEFAULT_MIN_SAMPLES, DEFAULT_STALE_AGE};
