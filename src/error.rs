//! Error types for the collector pipeline

use thiserror::Error;

/// Main error type for the collector pipeline.
///
/// Every failure falls into one of four buckets: transport (network,
/// timeout, non-success HTTP status), parse (unexpected payload shape),
/// database (pool or query failure) and config (initialization). No layer
/// retries internally; errors are logged with context and re-raised.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Network failure, timeout, or non-success HTTP status
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Response payload is missing expected keys or has the wrong shape
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Connection or query failure reported by the database
    #[error("Database error: {source}")]
    Database {
        #[source]
        source: sqlx::Error,
    },

    /// No pooled connection became available within the configured wait
    #[error("Pool timeout: no database connection became available within the configured wait")]
    PoolTimeout,

    /// Pool or connection initialization failure
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CollectorError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for CollectorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => CollectorError::PoolTimeout,
            source => CollectorError::Database { source },
        }
    }
}

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let transport_err = CollectorError::transport("connection refused");
        assert!(matches!(transport_err, CollectorError::Transport { .. }));

        let parse_err = CollectorError::parse("missing field `station_id`");
        assert!(matches!(parse_err, CollectorError::Parse { .. }));

        let config_err = CollectorError::config("max_pool_size must be nonzero");
        assert!(matches!(config_err, CollectorError::Config { .. }));
    }

    #[test]
    fn test_pool_timeout_is_distinguished() {
        let err: CollectorError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CollectorError::PoolTimeout));

        let err: CollectorError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CollectorError::Database { .. }));
    }

    #[test]
    fn test_display_includes_context() {
        let err = CollectorError::parse("missing field `capacity`");
        assert!(err.to_string().contains("missing field `capacity`"));
    }
}
