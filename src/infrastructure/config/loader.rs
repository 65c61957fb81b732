use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Redis URL cannot be empty")]
    EmptyRedisUrl,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Invalid {field}: must be greater than 0")]
    ZeroValue { field: &'static str },

    #[error(
        "Invalid liveness cache: floor ({floor}s) must not exceed the default TTL ({ttl}s)"
    )]
    InvalidCacheFloor { floor: u64, ttl: u64 },
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .fleetline/config.yaml
    /// 3. .fleetline/local.yaml (optional overrides)
    /// 4. Environment variables (FLEETLINE_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(".fleetline/config.yaml"))
                .merge(Yaml::file(".fleetline/local.yaml")),
        )
    }

    /// Load configuration from a specific file; environment variables still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path)),
        )
        .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Either the explicit file or the project-local hierarchy.
    pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .merge(Env::prefixed("FLEETLINE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.redis.url.trim().is_empty() {
            return Err(ConfigError::EmptyRedisUrl);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        let streams = &config.streams;
        for (field, value) in [
            ("streams.count", streams.count as u64),
            ("streams.block_ms", streams.block_ms),
            ("streams.reclaim_count", streams.reclaim_count as u64),
            ("streams.reclaim_interval_secs", streams.reclaim_interval_secs),
            ("streams.handler_timeout_secs", streams.handler_timeout_secs),
            ("liveness.offline_threshold_secs", config.liveness.offline_threshold_secs),
            ("liveness.cache_capacity", config.liveness.cache_capacity),
            (
                "reconciliation.max_conflicts_per_run",
                config.reconciliation.max_conflicts_per_run as u64,
            ),
            ("reconciliation.interval_secs", config.reconciliation.interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }

        if config.liveness.cache_ttl_floor_secs > config.liveness.cache_ttl_secs {
            return Err(ConfigError::InvalidCacheFloor {
                floor: config.liveness.cache_ttl_floor_secs,
                ttl: config.liveness.cache_ttl_secs,
            });
        }

        Ok(())
    }
}
