//! `velib-collector` - Bike-share station and weather data ingestion
//!
//! This library periodically pulls snapshots from the Velib open data feeds
//! and the Open-Meteo weather API and persists them into TimescaleDB with
//! well-defined conflict semantics: station reference data is upserted,
//! status ticks are append-only with conflict-ignore, current weather
//! overwrites by timestamp and historical backfills never touch existing
//! hours. Scheduling, secret loading and argument parsing stay with the
//! caller.

pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod stations;
pub mod weather;
pub mod weather_collector;

// Re-export core types for public API
pub use collector::{CollectionStats, StationCollector};
pub use config::DatabaseConfig;
pub use db::{Database, SqlValue};
pub use error::{CollectorError, Result};
pub use stations::{StationApiClient, StationInfo, StationStatus};
pub use weather::{WeatherApiClient, WeatherData};
pub use weather_collector::{WeatherCollector, WeatherStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
