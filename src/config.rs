//! Database configuration
//!
//! Connection settings are an explicit structure built by the caller and
//! injected into [`Database::connect`](crate::db::Database::connect); the
//! library never reads the environment on its own. The binary assembles the
//! structure from `DB_*` variables before handing it over.

use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and pool settings for the TimescaleDB instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    #[serde(default = "default_host")]
    pub host: String,
    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
    /// Database user
    #[serde(default = "default_user")]
    pub user: String,
    /// Database password
    #[serde(default)]
    pub password: String,
    /// Minimum number of pooled connections kept open
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// Bounded wait for a pooled connection, in seconds; a request still
    /// queued when this elapses fails with a pool-timeout error
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "velib".to_string()
}

fn default_user() -> String {
    "velib_user".to_string()
}

fn default_min_pool_size() -> u32 {
    1
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Build configuration from `DB_*` environment variables, falling back
    /// to defaults for anything unset. Intended for the binary entry point.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("DB_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("DB_PORT") {
            config.port = port
                .parse()
                .map_err(|_| CollectorError::config(format!("invalid DB_PORT: {port}")))?;
        }
        if let Ok(database) = std::env::var("DB_NAME") {
            config.database = database;
        }
        if let Ok(user) = std::env::var("DB_USER") {
            config.user = user;
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            config.password = password;
        }
        if let Ok(min) = std::env::var("DB_MIN_POOL_SIZE") {
            config.min_pool_size = min
                .parse()
                .map_err(|_| CollectorError::config(format!("invalid DB_MIN_POOL_SIZE: {min}")))?;
        }
        if let Ok(max) = std::env::var("DB_MAX_POOL_SIZE") {
            config.max_pool_size = max
                .parse()
                .map_err(|_| CollectorError::config(format!("invalid DB_MAX_POOL_SIZE: {max}")))?;
        }
        if let Ok(timeout) = std::env::var("DB_REQUEST_TIMEOUT") {
            config.request_timeout_seconds = timeout.parse().map_err(|_| {
                CollectorError::config(format!("invalid DB_REQUEST_TIMEOUT: {timeout}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate settings before pool initialization
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CollectorError::config("database host cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(CollectorError::config("database name cannot be empty"));
        }
        if self.max_pool_size == 0 {
            return Err(CollectorError::config("max_pool_size must be at least 1"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(CollectorError::config(format!(
                "min_pool_size ({}) cannot exceed max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Bounded wait for a pooled connection
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "velib");
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_host() {
        let config = DatabaseConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CollectorError::Config { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_max_pool() {
        let config = DatabaseConfig {
            max_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig {
            min_pool_size: 5,
            max_pool_size: 2,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_pool_size"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: DatabaseConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_pool_size, 10);
    }
}
