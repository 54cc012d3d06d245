//! Scheduler-facing entry points for the collector pipeline.
//!
//! Each subcommand is one unit of work invoked by an external scheduler;
//! this binary owns configuration loading, pool lifecycle and exit-code
//! mapping, none of which live in the library.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use velib_collector::{
    Database, DatabaseConfig, StationApiClient, StationCollector, WeatherApiClient,
    WeatherCollector, stations, weather,
};

const USAGE: &str = "usage: velib-collector <command>

commands:
  update-stations                    refresh station reference data
  collect-status                     append one station status tick
  collect-weather                    upsert the current weather snapshot
  backfill-weather [START] [END]     backfill hourly weather (dates as YYYY-MM-DD)
  check                              verify database connectivity and table state
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{USAGE}");
        bail!("no command given");
    };

    let config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let db = Database::connect(&config).await?;

    let outcome = run(command, &args[1..], &db).await;

    // The pool is closed on both the success and the failure path
    db.close().await;

    match outcome {
        Ok(rows) => {
            info!("{command} finished: {rows} rows affected");
            Ok(())
        }
        Err(e) => {
            error!("{command} failed: {e:#}");
            Err(e)
        }
    }
}

async fn run(command: &str, args: &[String], db: &Database) -> Result<u64> {
    match command {
        "update-stations" => {
            let api = StationApiClient::new(stations::DEFAULT_TIMEOUT)?;
            let collector = StationCollector::new(db.clone(), api);
            let count = collector.update_station_information().await?;
            let stats = collector.get_collection_stats().await?;
            info!(
                "Collection stats: {} stations with data, {} records in 24h, {} stations total",
                stats.stations_with_data, stats.total_records, stats.total_stations
            );
            Ok(count)
        }
        "collect-status" => {
            let api = StationApiClient::new(stations::DEFAULT_TIMEOUT)?;
            let collector = StationCollector::new(db.clone(), api);
            let count = collector.collect_station_status().await?;
            let stats = collector.get_collection_stats().await?;
            info!(
                "Collection stats: {} stations with data, {} records in 24h",
                stats.stations_with_data, stats.total_records
            );
            Ok(count)
        }
        "collect-weather" => {
            let api = WeatherApiClient::new(weather::DEFAULT_TIMEOUT)?;
            let collector = WeatherCollector::new(db.clone(), api);
            let count = collector.collect_current_weather().await?;
            let stats = collector.get_weather_stats().await?;
            info!(
                "Weather stats: {} records in 7d, avg temperature {:?}",
                stats.total_records, stats.avg_temperature
            );
            Ok(count)
        }
        "backfill-weather" => {
            let start = args.first().map(|raw| parse_date(raw)).transpose()?;
            let end = args.get(1).map(|raw| parse_date(raw)).transpose()?;
            let api = WeatherApiClient::new(weather::DEFAULT_TIMEOUT)?;
            let collector = WeatherCollector::new(db.clone(), api);
            Ok(collector.backfill_historical_weather(start, end).await?)
        }
        "check" => {
            for table in ["station_information", "station_status", "weather_data"] {
                if db.table_exists(table).await? {
                    let rows = db.table_row_count(table).await?;
                    info!("Table '{table}' exists with {rows} rows");
                } else {
                    info!("Table '{table}' does not exist");
                }
            }
            Ok(0)
        }
        other => {
            eprint!("{USAGE}");
            bail!("unknown command: {other}")
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date: {raw}"))
}
