//! Weather collector orchestrator
//!
//! Current readings are upserted so a retried run always leaves the latest
//! observation in place; historical backfills are conflict-ignore so they
//! never rewrite hours that were already ingested.

use crate::db::Database;
use crate::error::Result;
use crate::weather::{WeatherApiClient, WeatherData};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use tracing::{info, warn};

/// Records per chunk when looping batched statements
const BATCH_SIZE: usize = 1000;

const UPSERT_WEATHER: &str = "
    INSERT INTO weather_data (
        time, temperature, apparent_temperature, precipitation,
        rain, snowfall, wind_speed, wind_direction, wind_gusts,
        pressure, humidity, cloud_cover, weather_code
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (time) DO UPDATE SET
        temperature = EXCLUDED.temperature,
        apparent_temperature = EXCLUDED.apparent_temperature,
        precipitation = EXCLUDED.precipitation,
        rain = EXCLUDED.rain,
        snowfall = EXCLUDED.snowfall,
        wind_speed = EXCLUDED.wind_speed,
        wind_direction = EXCLUDED.wind_direction,
        wind_gusts = EXCLUDED.wind_gusts,
        pressure = EXCLUDED.pressure,
        humidity = EXCLUDED.humidity,
        cloud_cover = EXCLUDED.cloud_cover,
        weather_code = EXCLUDED.weather_code
";

const INSERT_WEATHER_IGNORE: &str = "
    INSERT INTO weather_data (
        time, temperature, apparent_temperature, precipitation,
        rain, snowfall, wind_speed, wind_direction, wind_gusts,
        pressure, humidity, cloud_cover, weather_code
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (time) DO NOTHING
";

const WEATHER_STATS: &str = "
    SELECT
        COUNT(*) AS total_records,
        MIN(time) AS oldest_record,
        MAX(time) AS newest_record,
        AVG(temperature) AS avg_temperature,
        SUM(CASE WHEN precipitation > 0 THEN 1 ELSE 0 END) AS rainy_periods
    FROM weather_data
    WHERE time > NOW() - INTERVAL '7 days'
";

fn bind_weather<'q>(statement: &'q str, w: &'q WeatherData) -> Query<'q, Postgres, PgArguments> {
    sqlx::query(statement)
        .bind(w.time)
        .bind(w.temperature)
        .bind(w.apparent_temperature)
        .bind(w.precipitation)
        .bind(w.rain)
        .bind(w.snowfall)
        .bind(w.wind_speed)
        .bind(w.wind_direction)
        .bind(w.wind_gusts)
        .bind(w.pressure)
        .bind(w.humidity)
        .bind(w.cloud_cover)
        .bind(w.weather_code)
}

/// Aggregate view of the trailing 7 days of weather data
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct WeatherStats {
    pub total_records: i64,
    pub oldest_record: Option<DateTime<Utc>>,
    pub newest_record: Option<DateTime<Utc>>,
    pub avg_temperature: Option<f64>,
    /// Periods in the window with nonzero precipitation
    pub rainy_periods: Option<i64>,
}

/// Orchestrates current-weather upserts and historical backfills
pub struct WeatherCollector {
    db: Database,
    api: WeatherApiClient,
}

impl WeatherCollector {
    pub fn new(db: Database, api: WeatherApiClient) -> Self {
        Self { db, api }
    }

    /// Fetch one snapshot and upsert it by timestamp. Unlike station
    /// status, a retry intentionally overwrites: "current" readings should
    /// always reflect the latest observation.
    pub async fn collect_current_weather(&self) -> Result<u64> {
        info!("Collecting current weather");
        let weather = self.api.fetch_current_weather().await?;

        let rows = self.db.execute(bind_weather(UPSERT_WEATHER, &weather)).await?;
        info!("Stored weather data for {}", weather.time);
        Ok(rows)
    }

    /// Backfill the hourly series for an inclusive date range.
    ///
    /// `start` defaults to the earliest date present in station status
    /// data, anchoring the weather range to the station data range; `end`
    /// defaults to yesterday. Hours already ingested are never overwritten.
    /// Returns the count inserted; 0 with a warning when the upstream
    /// returns nothing.
    pub async fn backfill_historical_weather(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<u64> {
        let end_date = end_date.unwrap_or_else(yesterday);
        let start_date = match start_date {
            Some(date) => date,
            // No station data to anchor on: fall back to a one-day range
            None => self
                .earliest_station_status_date()
                .await?
                .unwrap_or(end_date),
        };

        info!("Backfilling historical weather from {start_date} to {end_date}");
        let records = self
            .api
            .fetch_historical_weather(start_date, end_date)
            .await?;

        if records.is_empty() {
            warn!("No historical weather data found for {start_date}..={end_date}");
            return Ok(0);
        }

        let rows_inserted = self
            .db
            .execute_many(&records, BATCH_SIZE, |w| {
                bind_weather(INSERT_WEATHER_IGNORE, w)
            })
            .await?;

        info!("Backfilled {rows_inserted} weather records");
        Ok(rows_inserted)
    }

    /// Aggregate statistics over the trailing 7 days of weather data
    pub async fn get_weather_stats(&self) -> Result<WeatherStats> {
        let stats = self
            .db
            .fetch_one(sqlx::query_as(WEATHER_STATS))
            .await?
            .unwrap_or_default();
        Ok(stats)
    }

    async fn earliest_station_status_date(&self) -> Result<Option<NaiveDate>> {
        let row: Option<(Option<NaiveDate>,)> = self
            .db
            .fetch_one(sqlx::query_as(
                "SELECT MIN(time)::date AS min_date FROM station_status",
            ))
            .await?;
        Ok(row.and_then(|(date,)| date))
    }
}

fn yesterday() -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap_or_else(|| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yesterday_is_one_day_back() {
        let today = Utc::now().date_naive();
        assert_eq!(yesterday().succ_opt().unwrap(), today);
    }

    #[test]
    fn test_weather_stats_default_is_empty() {
        let stats = WeatherStats::default();
        assert_eq!(stats.total_records, 0);
        assert!(stats.avg_temperature.is_none());
        assert!(stats.rainy_periods.is_none());
    }
}
