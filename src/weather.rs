//! Open-Meteo weather API client
//!
//! Fetches current observations from the forecast endpoint and hourly
//! history from the archive endpoint, both pinned to the Paris coordinates
//! the station network covers. Optional measurements decode to `None` when
//! absent, except precipitation, rain and snowfall which default to 0.

use crate::error::{CollectorError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

// Paris coordinates
const LATITUDE: f64 = 48.8566;
const LONGITUDE: f64 = 2.3522;

const FIELDS: &str = "temperature_2m,apparent_temperature,precipitation,rain,snowfall,\
                      weather_code,cloud_cover,pressure_msl,wind_speed_10m,\
                      wind_direction_10m,wind_gusts_10m,relative_humidity_2m";

const USER_AGENT: &str = "velib-collector/0.1";

/// Default per-request network timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One weather observation, keyed by its timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherData {
    pub time: DateTime<Utc>,
    /// Air temperature at 2 m, °C
    pub temperature: f64,
    pub apparent_temperature: Option<f64>,
    /// Total precipitation, mm; 0 when the feed omits it
    pub precipitation: f64,
    pub rain: f64,
    pub snowfall: f64,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<i32>,
    pub wind_gusts: Option<f64>,
    /// Mean sea-level pressure, hPa
    pub pressure: Option<f64>,
    /// Relative humidity, percent
    pub humidity: Option<i32>,
    pub cloud_cover: Option<i32>,
    /// WMO weather interpretation code
    pub weather_code: Option<i32>,
}

/// Wire format of the Open-Meteo responses
mod open_meteo {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct CurrentResponse {
        pub current: CurrentBlock,
    }

    #[derive(Debug, Deserialize)]
    pub struct CurrentBlock {
        pub time: String,
        #[serde(rename = "temperature_2m")]
        pub temperature: f64,
        pub apparent_temperature: Option<f64>,
        pub precipitation: Option<f64>,
        pub rain: Option<f64>,
        pub snowfall: Option<f64>,
        #[serde(rename = "wind_speed_10m")]
        pub wind_speed: Option<f64>,
        #[serde(rename = "wind_direction_10m")]
        pub wind_direction: Option<i32>,
        #[serde(rename = "wind_gusts_10m")]
        pub wind_gusts: Option<f64>,
        #[serde(rename = "pressure_msl")]
        pub pressure: Option<f64>,
        #[serde(rename = "relative_humidity_2m")]
        pub humidity: Option<i32>,
        pub cloud_cover: Option<i32>,
        pub weather_code: Option<i32>,
    }

    /// Archive responses carry parallel arrays indexed by position; a
    /// missing optional array stands for "absent at every index"
    #[derive(Debug, Deserialize)]
    pub struct ArchiveResponse {
        pub hourly: HourlyBlock,
    }

    #[derive(Debug, Deserialize)]
    pub struct HourlyBlock {
        pub time: Vec<String>,
        #[serde(rename = "temperature_2m")]
        pub temperature: Vec<Option<f64>>,
        pub apparent_temperature: Option<Vec<Option<f64>>>,
        pub precipitation: Option<Vec<Option<f64>>>,
        pub rain: Option<Vec<Option<f64>>>,
        pub snowfall: Option<Vec<Option<f64>>>,
        #[serde(rename = "wind_speed_10m")]
        pub wind_speed: Option<Vec<Option<f64>>>,
        #[serde(rename = "wind_direction_10m")]
        pub wind_direction: Option<Vec<Option<i32>>>,
        #[serde(rename = "wind_gusts_10m")]
        pub wind_gusts: Option<Vec<Option<f64>>>,
        #[serde(rename = "pressure_msl")]
        pub pressure: Option<Vec<Option<f64>>>,
        #[serde(rename = "relative_humidity_2m")]
        pub humidity: Option<Vec<Option<i32>>>,
        pub cloud_cover: Option<Vec<Option<i32>>>,
        pub weather_code: Option<Vec<Option<i32>>>,
    }
}

/// Parse an ISO-8601 timestamp, normalizing a trailing `Z` to an explicit
/// `+00:00` offset; offset-free timestamps are taken as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let normalized = match raw.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| CollectorError::parse(format!("invalid timestamp {raw:?}: {e}")))
}

fn value_at<T: Copy>(column: &Option<Vec<Option<T>>>, index: usize) -> Option<T> {
    column
        .as_ref()
        .and_then(|values| values.get(index))
        .copied()
        .flatten()
}

/// Decode a current-weather payload into one observation
pub fn parse_current_weather(body: &str) -> Result<WeatherData> {
    let response: open_meteo::CurrentResponse = serde_json::from_str(body)
        .map_err(|e| CollectorError::parse(format!("unexpected current weather payload: {e}")))?;
    let current = response.current;

    Ok(WeatherData {
        time: parse_timestamp(&current.time)?,
        temperature: current.temperature,
        apparent_temperature: current.apparent_temperature,
        precipitation: current.precipitation.unwrap_or(0.0),
        rain: current.rain.unwrap_or(0.0),
        snowfall: current.snowfall.unwrap_or(0.0),
        wind_speed: current.wind_speed,
        wind_direction: current.wind_direction,
        wind_gusts: current.wind_gusts,
        pressure: current.pressure,
        humidity: current.humidity,
        cloud_cover: current.cloud_cover,
        weather_code: current.weather_code,
    })
}

/// Decode an archive payload: record *i* is built from index *i* of every
/// parallel array, for every index of the `time` array.
pub fn parse_historical_weather(body: &str) -> Result<Vec<WeatherData>> {
    let response: open_meteo::ArchiveResponse = serde_json::from_str(body)
        .map_err(|e| CollectorError::parse(format!("unexpected archive payload: {e}")))?;
    let hourly = response.hourly;

    let mut records = Vec::with_capacity(hourly.time.len());
    for (i, raw_time) in hourly.time.iter().enumerate() {
        let temperature = hourly
            .temperature
            .get(i)
            .copied()
            .flatten()
            .ok_or_else(|| {
                CollectorError::parse(format!("hourly temperature_2m missing at index {i}"))
            })?;

        records.push(WeatherData {
            time: parse_timestamp(raw_time)?,
            temperature,
            apparent_temperature: value_at(&hourly.apparent_temperature, i),
            precipitation: value_at(&hourly.precipitation, i).unwrap_or(0.0),
            rain: value_at(&hourly.rain, i).unwrap_or(0.0),
            snowfall: value_at(&hourly.snowfall, i).unwrap_or(0.0),
            wind_speed: value_at(&hourly.wind_speed, i),
            wind_direction: value_at(&hourly.wind_direction, i),
            wind_gusts: value_at(&hourly.wind_gusts, i),
            pressure: value_at(&hourly.pressure, i),
            humidity: value_at(&hourly.humidity, i),
            cloud_cover: value_at(&hourly.cloud_cover, i),
            weather_code: value_at(&hourly.weather_code, i),
        });
    }

    Ok(records)
}

/// Client for the Open-Meteo forecast and archive APIs
pub struct WeatherApiClient {
    client: Client,
}

impl WeatherApiClient {
    /// Create a new client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CollectorError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch one current-weather snapshot
    pub async fn fetch_current_weather(&self) -> Result<WeatherData> {
        info!("Fetching current weather from Open-Meteo");

        let body = self
            .get_text(
                FORECAST_URL,
                &[
                    ("latitude", LATITUDE.to_string()),
                    ("longitude", LONGITUDE.to_string()),
                    ("current", FIELDS.to_string()),
                    ("timezone", "UTC".to_string()),
                ],
            )
            .await?;

        let weather = parse_current_weather(&body)?;
        info!(
            "Fetched weather: {}°C, {}mm precipitation",
            weather.temperature, weather.precipitation
        );
        Ok(weather)
    }

    /// Fetch the hourly series for an inclusive calendar-date range
    pub async fn fetch_historical_weather(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<WeatherData>> {
        info!("Fetching historical weather from {start_date} to {end_date}");

        let body = self
            .get_text(
                ARCHIVE_URL,
                &[
                    ("latitude", LATITUDE.to_string()),
                    ("longitude", LONGITUDE.to_string()),
                    ("start_date", start_date.format("%Y-%m-%d").to_string()),
                    ("end_date", end_date.format("%Y-%m-%d").to_string()),
                    ("hourly", FIELDS.to_string()),
                    ("timezone", "UTC".to_string()),
                ],
            )
            .await?;

        let records = parse_historical_weather(&body)?;
        info!("Fetched {} historical weather records", records.len());
        Ok(records)
    }

    async fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                error!("Request to {url} failed: {e}");
                CollectorError::transport(format!("request to {url} failed: {e}"))
            })?;

        let response = response.error_for_status().map_err(|e| {
            error!("Request to {url} returned error status: {e}");
            CollectorError::transport(format!("{url} returned error status: {e}"))
        })?;

        response.text().await.map_err(|e| {
            error!("Failed to read response body from {url}: {e}");
            CollectorError::transport(format!("failed to read response body from {url}: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_trailing_z_normalized() {
        let parsed = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp_without_offset_taken_as_utc() {
        let parsed = parse_timestamp("2024-03-01T12:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp_with_explicit_offset() {
        let parsed = parse_timestamp("2024-03-01T14:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp_garbage_is_parse_error() {
        let err = parse_timestamp("not-a-time").unwrap_err();
        assert!(matches!(err, CollectorError::Parse { .. }));
    }

    #[test]
    fn test_parse_current_weather_full_block() {
        let body = r#"{
            "current": {
                "time": "2024-03-01T12:00",
                "temperature_2m": 10.4,
                "apparent_temperature": 8.1,
                "precipitation": 0.3,
                "rain": 0.3,
                "snowfall": 0.0,
                "weather_code": 61,
                "cloud_cover": 90,
                "pressure_msl": 1013.2,
                "wind_speed_10m": 14.0,
                "wind_direction_10m": 220,
                "wind_gusts_10m": 31.0,
                "relative_humidity_2m": 84
            }
        }"#;

        let weather = parse_current_weather(body).unwrap();
        assert_eq!(weather.temperature, 10.4);
        assert_eq!(weather.apparent_temperature, Some(8.1));
        assert_eq!(weather.precipitation, 0.3);
        assert_eq!(weather.humidity, Some(84));
        assert_eq!(weather.weather_code, Some(61));
    }

    #[test]
    fn test_parse_current_weather_default_policy() {
        // Absent optional fields decode to None, except the precipitation
        // family which defaults to 0
        let body = r#"{
            "current": {
                "time": "2024-03-01T12:00",
                "temperature_2m": 5.0
            }
        }"#;

        let weather = parse_current_weather(body).unwrap();
        assert_eq!(weather.precipitation, 0.0);
        assert_eq!(weather.rain, 0.0);
        assert_eq!(weather.snowfall, 0.0);
        assert_eq!(weather.apparent_temperature, None);
        assert_eq!(weather.wind_speed, None);
        assert_eq!(weather.pressure, None);
    }

    #[test]
    fn test_parse_current_weather_missing_temperature_is_parse_error() {
        let body = r#"{"current": {"time": "2024-03-01T12:00"}}"#;
        let err = parse_current_weather(body).unwrap_err();
        assert!(matches!(err, CollectorError::Parse { .. }));
        assert!(err.to_string().contains("temperature_2m"));
    }

    #[test]
    fn test_parse_historical_alignment() {
        let body = r#"{
            "hourly": {
                "time": ["2024-03-01T00:00", "2024-03-01T01:00"],
                "temperature_2m": [5.0, 6.0]
            }
        }"#;

        let records = parse_historical_weather(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].time,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(records[0].temperature, 5.0);
        assert_eq!(
            records[1].time,
            Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap()
        );
        assert_eq!(records[1].temperature, 6.0);
    }

    #[test]
    fn test_parse_historical_missing_arrays_default_per_field() {
        let body = r#"{
            "hourly": {
                "time": ["2024-03-01T00:00"],
                "temperature_2m": [4.2],
                "wind_speed_10m": [null]
            }
        }"#;

        let records = parse_historical_weather(body).unwrap();
        assert_eq!(records[0].precipitation, 0.0);
        assert_eq!(records[0].snowfall, 0.0);
        assert_eq!(records[0].wind_speed, None);
        assert_eq!(records[0].humidity, None);
    }

    #[test]
    fn test_parse_historical_null_temperature_is_parse_error() {
        let body = r#"{
            "hourly": {
                "time": ["2024-03-01T00:00", "2024-03-01T01:00"],
                "temperature_2m": [4.2, null]
            }
        }"#;

        let err = parse_historical_weather(body).unwrap_err();
        assert!(matches!(err, CollectorError::Parse { .. }));
        assert!(err.to_string().contains("index 1"));
    }

    #[test]
    fn test_parse_historical_empty_series() {
        let body = r#"{"hourly": {"time": [], "temperature_2m": []}}"#;
        assert!(parse_historical_weather(body).unwrap().is_empty());
    }
}
