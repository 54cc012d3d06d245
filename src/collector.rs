//! Station collector orchestrator
//!
//! Combines the station API client with the database layer: reference data
//! is upserted wholesale, status ticks are appended with conflict-ignore so
//! overlapping runs never double-count, and the derived latest-status view
//! is refreshed after each tick.

use crate::db::Database;
use crate::error::Result;
use crate::stations::StationApiClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::info;

/// Records per chunk when looping batched statements
const BATCH_SIZE: usize = 1000;

const UPSERT_STATION_INFORMATION: &str = "
    INSERT INTO station_information (
        station_id, station_code, name, lat, lon, capacity, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
    ON CONFLICT (station_id)
    DO UPDATE SET
        station_code = EXCLUDED.station_code,
        name = EXCLUDED.name,
        lat = EXCLUDED.lat,
        lon = EXCLUDED.lon,
        capacity = EXCLUDED.capacity,
        updated_at = CURRENT_TIMESTAMP
";

const INSERT_STATION_STATUS: &str = "
    INSERT INTO station_status (
        time, station_id, num_bikes_available, num_mechanical,
        num_ebike, num_docks_available, is_installed,
        is_returning, is_renting, last_reported
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (time, station_id) DO NOTHING
";

const COLLECTION_STATS: &str = "
    SELECT
        COUNT(DISTINCT station_id) AS stations_with_data,
        COUNT(*) AS total_records,
        MIN(time) AS oldest_record,
        MAX(time) AS newest_record,
        (SELECT COUNT(*) FROM station_information) AS total_stations
    FROM station_status
    WHERE time > NOW() - INTERVAL '24 hours'
";

/// Aggregate view of the trailing 24 hours of status collection
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct CollectionStats {
    /// Stations with at least one status row in the window
    pub stations_with_data: i64,
    pub total_records: i64,
    pub oldest_record: Option<DateTime<Utc>>,
    pub newest_record: Option<DateTime<Utc>>,
    /// Total rows in the reference table, regardless of window
    pub total_stations: i64,
}

/// Orchestrates station reference refreshes and status tick collection
pub struct StationCollector {
    db: Database,
    api: StationApiClient,
}

impl StationCollector {
    pub fn new(db: Database, api: StationApiClient) -> Self {
        Self { db, api }
    }

    /// Fetch the full station list and upsert it, overwriting every mutable
    /// field and stamping the update time. Returns the count fetched, not
    /// the count that actually changed. Intended to run daily.
    pub async fn update_station_information(&self) -> Result<u64> {
        info!("Updating station information");
        let stations = self.api.fetch_station_information().await?;

        self.db
            .execute_many(&stations, BATCH_SIZE, |s| {
                sqlx::query(UPSERT_STATION_INFORMATION)
                    .bind(s.station_id)
                    .bind(&s.station_code)
                    .bind(&s.name)
                    .bind(s.lat)
                    .bind(s.lon)
                    .bind(s.capacity)
            })
            .await?;

        info!("Updated {} stations in database", stations.len());
        Ok(stations.len() as u64)
    }

    /// Fetch the full status list and append it as one tick: every record
    /// in the batch shares a single collection timestamp, and rows that
    /// collide on (time, station_id) are silently skipped. Returns the
    /// count actually inserted, which is lower than the count fetched when
    /// a tick is retried.
    ///
    /// The status rows are committed before the latest-status view refresh
    /// runs; a refresh failure therefore propagates even though the tick is
    /// already persisted.
    pub async fn collect_station_status(&self) -> Result<u64> {
        info!("Collecting station status");
        let statuses = self.api.fetch_station_status().await?;

        // One API round-trip is one logical tick
        let collected_at = Utc::now();

        let rows_inserted = self
            .db
            .execute_many(&statuses, BATCH_SIZE, |s| {
                sqlx::query(INSERT_STATION_STATUS)
                    .bind(collected_at)
                    .bind(s.station_id)
                    .bind(s.num_bikes_available)
                    .bind(s.num_mechanical)
                    .bind(s.num_ebike)
                    .bind(s.num_docks_available)
                    .bind(s.is_installed)
                    .bind(s.is_returning)
                    .bind(s.is_renting)
                    .bind(s.last_reported)
            })
            .await?;

        info!("Inserted {rows_inserted} status records at {collected_at}");

        self.refresh_latest_status_view().await?;

        Ok(rows_inserted)
    }

    /// Refresh the derived latest-status view without blocking readers.
    ///
    /// Exposed separately so a caller observing a refresh failure after a
    /// committed tick can retry the refresh alone.
    pub async fn refresh_latest_status_view(&self) -> Result<()> {
        // CONCURRENTLY refuses to run inside a transaction block
        self.db
            .execute_autocommit(sqlx::query(
                "REFRESH MATERIALIZED VIEW CONCURRENTLY latest_station_status",
            ))
            .await?;
        info!("Refreshed latest_station_status view");
        Ok(())
    }

    /// Aggregate statistics over the trailing 24 hours of collection
    pub async fn get_collection_stats(&self) -> Result<CollectionStats> {
        let stats = self
            .db
            .fetch_one(sqlx::query_as(COLLECTION_STATS))
            .await?
            .unwrap_or_default();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default_is_empty() {
        let stats = CollectionStats::default();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.stations_with_data, 0);
        assert!(stats.oldest_record.is_none());
        assert!(stats.newest_record.is_none());
    }
}
