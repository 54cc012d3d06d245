//! Velib station API client
//!
//! Fetches station reference data and live status from the Velib Metropole
//! open data feeds and decodes the `{data:{stations:[...]}}` payloads into
//! typed records. One stateless request per fetch; a failure propagates
//! immediately with no internal retry.

use crate::error::{CollectorError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

const BASE_URL: &str = "https://velib-metropole-opendata.smovengo.cloud/opendata/Velib_Metropole";
const USER_AGENT: &str = "velib-collector/0.1";

/// Default per-request network timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Station reference data, keyed by `station_id`
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub station_id: i64,
    pub station_code: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub capacity: i32,
}

/// One station's live status as reported by the feed.
///
/// The collection timestamp is not part of this record; the orchestrator
/// stamps a single shared tick time onto the whole fetched batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StationStatus {
    pub station_id: i64,
    pub num_bikes_available: i32,
    pub num_mechanical: i32,
    pub num_ebike: i32,
    pub num_docks_available: i32,
    pub is_installed: bool,
    pub is_returning: bool,
    pub is_renting: bool,
    /// Provider-reported last-update time, epoch seconds
    pub last_reported: i64,
}

/// Wire format of the GBFS-style station feeds
mod gbfs {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FeedResponse<T> {
        pub data: StationList<T>,
    }

    #[derive(Debug, Deserialize)]
    pub struct StationList<T> {
        pub stations: Vec<T>,
    }

    #[derive(Debug, Deserialize)]
    pub struct InformationEntry {
        pub station_id: i64,
        #[serde(rename = "stationCode")]
        pub station_code: String,
        pub name: String,
        pub lat: f64,
        pub lon: f64,
        pub capacity: i32,
    }

    #[derive(Debug, Deserialize)]
    pub struct StatusEntry {
        pub station_id: i64,
        pub num_bikes_available: i32,
        #[serde(default)]
        pub num_bikes_available_types: Vec<BikeTypeEntry>,
        pub num_docks_available: i32,
        pub is_installed: i32,
        pub is_returning: i32,
        pub is_renting: i32,
        pub last_reported: i64,
    }

    /// One element of the heterogeneous bike-type sub-list; each element
    /// carries either a `mechanical` or an `ebike` count
    #[derive(Debug, Deserialize)]
    pub struct BikeTypeEntry {
        pub mechanical: Option<i32>,
        pub ebike: Option<i32>,
    }
}

/// Split the bike-type sub-list into (mechanical, ebike) counts.
///
/// Each element sets whichever count it carries; when the same kind appears
/// more than once the last element scanned wins. An empty sub-list leaves
/// both counts at 0.
fn split_bike_types(entries: &[gbfs::BikeTypeEntry]) -> (i32, i32) {
    let mut num_mechanical = 0;
    let mut num_ebike = 0;
    for entry in entries {
        if let Some(mechanical) = entry.mechanical {
            num_mechanical = mechanical;
        } else if let Some(ebike) = entry.ebike {
            num_ebike = ebike;
        }
    }
    (num_mechanical, num_ebike)
}

/// Decode a station-information payload into typed records
pub fn parse_station_information(body: &str) -> Result<Vec<StationInfo>> {
    let response: gbfs::FeedResponse<gbfs::InformationEntry> = serde_json::from_str(body)
        .map_err(|e| CollectorError::parse(format!("unexpected station information payload: {e}")))?;

    Ok(response
        .data
        .stations
        .into_iter()
        .map(|station| StationInfo {
            station_id: station.station_id,
            station_code: station.station_code,
            name: station.name,
            lat: station.lat,
            lon: station.lon,
            capacity: station.capacity,
        })
        .collect())
}

/// Decode a station-status payload into typed records
pub fn parse_station_status(body: &str) -> Result<Vec<StationStatus>> {
    let response: gbfs::FeedResponse<gbfs::StatusEntry> = serde_json::from_str(body)
        .map_err(|e| CollectorError::parse(format!("unexpected station status payload: {e}")))?;

    Ok(response
        .data
        .stations
        .into_iter()
        .map(|station| {
            let (num_mechanical, num_ebike) =
                split_bike_types(&station.num_bikes_available_types);
            StationStatus {
                station_id: station.station_id,
                num_bikes_available: station.num_bikes_available,
                num_mechanical,
                num_ebike,
                num_docks_available: station.num_docks_available,
                is_installed: station.is_installed != 0,
                is_returning: station.is_returning != 0,
                is_renting: station.is_renting != 0,
                last_reported: station.last_reported,
            }
        })
        .collect())
}

/// Client for the Velib open data API
pub struct StationApiClient {
    client: Client,
    information_url: String,
    status_url: String,
}

impl StationApiClient {
    /// Create a new client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CollectorError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            information_url: format!("{BASE_URL}/station_information.json"),
            status_url: format!("{BASE_URL}/station_status.json"),
        })
    }

    /// Fetch the full station reference list
    pub async fn fetch_station_information(&self) -> Result<Vec<StationInfo>> {
        info!("Fetching station information");
        let body = self.get_text(&self.information_url).await?;
        let stations = parse_station_information(&body)?;
        info!("Fetched {} station information records", stations.len());
        Ok(stations)
    }

    /// Fetch the current status of every station
    pub async fn fetch_station_status(&self) -> Result<Vec<StationStatus>> {
        info!("Fetching station status");
        let body = self.get_text(&self.status_url).await?;
        let statuses = parse_station_status(&body)?;
        info!("Fetched {} station status records", statuses.len());
        Ok(statuses)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
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
    use rstest::rstest;

    #[rstest]
    #[case(r#"[{"mechanical": 3}, {"ebike": 2}]"#, 3, 2)]
    #[case(r#"[]"#, 0, 0)]
    #[case(r#"[{"mechanical": 1}, {"mechanical": 4}]"#, 4, 0)]
    #[case(r#"[{"ebike": 7}]"#, 0, 7)]
    fn test_bike_type_split(
        #[case] sub_list: &str,
        #[case] expected_mechanical: i32,
        #[case] expected_ebike: i32,
    ) {
        let entries: Vec<gbfs::BikeTypeEntry> = serde_json::from_str(sub_list).unwrap();
        assert_eq!(
            split_bike_types(&entries),
            (expected_mechanical, expected_ebike)
        );
    }

    #[test]
    fn test_bike_type_element_carrying_both_counts_as_mechanical() {
        // An element with both fields sets only the mechanical count
        let entries: Vec<gbfs::BikeTypeEntry> =
            serde_json::from_str(r#"[{"mechanical": 2, "ebike": 5}]"#).unwrap();
        assert_eq!(split_bike_types(&entries), (2, 0));
    }

    #[test]
    fn test_parse_station_information() {
        let body = r#"{
            "data": {
                "stations": [
                    {
                        "station_id": 213688169,
                        "stationCode": "16107",
                        "name": "Benjamin Godard - Victor Hugo",
                        "lat": 48.865983,
                        "lon": 2.275725,
                        "capacity": 35
                    }
                ]
            }
        }"#;

        let stations = parse_station_information(body).unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].station_id, 213688169);
        assert_eq!(stations[0].station_code, "16107");
        assert_eq!(stations[0].name, "Benjamin Godard - Victor Hugo");
        assert_eq!(stations[0].capacity, 35);
    }

    #[test]
    fn test_parse_station_status() {
        let body = r#"{
            "data": {
                "stations": [
                    {
                        "station_id": 213688169,
                        "num_bikes_available": 5,
                        "num_bikes_available_types": [{"mechanical": 3}, {"ebike": 2}],
                        "num_docks_available": 30,
                        "is_installed": 1,
                        "is_returning": 1,
                        "is_renting": 0,
                        "last_reported": 1709290000
                    }
                ]
            }
        }"#;

        let statuses = parse_station_status(body).unwrap();
        assert_eq!(statuses.len(), 1);
        let status = &statuses[0];
        assert_eq!(status.num_bikes_available, 5);
        assert_eq!(status.num_mechanical, 3);
        assert_eq!(status.num_ebike, 2);
        assert!(status.is_installed);
        assert!(status.is_returning);
        assert!(!status.is_renting);
        assert_eq!(status.last_reported, 1709290000);
    }

    #[test]
    fn test_parse_status_without_bike_type_list_defaults_to_zero() {
        let body = r#"{
            "data": {
                "stations": [
                    {
                        "station_id": 1,
                        "num_bikes_available": 4,
                        "num_docks_available": 10,
                        "is_installed": 1,
                        "is_returning": 1,
                        "is_renting": 1,
                        "last_reported": 1709290000
                    }
                ]
            }
        }"#;

        let statuses = parse_station_status(body).unwrap();
        assert_eq!(statuses[0].num_mechanical, 0);
        assert_eq!(statuses[0].num_ebike, 0);
    }

    #[test]
    fn test_parse_error_names_missing_field() {
        let body = r#"{"data": {"stations": [{"stationCode": "42"}]}}"#;
        let err = parse_station_information(body).unwrap_err();
        assert!(matches!(err, CollectorError::Parse { .. }));
        assert!(err.to_string().contains("station_id"));
    }

    #[test]
    fn test_parse_error_on_missing_envelope() {
        let err = parse_station_status(r#"{"stations": []}"#).unwrap_err();
        assert!(matches!(err, CollectorError::Parse { .. }));
    }
}
