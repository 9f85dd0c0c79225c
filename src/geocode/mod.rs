use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::error;

use crate::model::submission::parse_coordinate;

pub const UNKNOWN_ADDRESS: &str = "Unknown";
pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";

const USER_AGENT: &str = "looma-scan-app";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("coordinates out of range: {lat}, {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },
    #[error("geocoder request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder responded with {0}")]
    Status(reqwest::StatusCode),
    #[error("geocoder returned no address")]
    NoAddress,
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Reverse geocoding against a Nominatim-compatible `/reverse` endpoint.
///
/// One request per call, bounded by a fixed timeout, no retry and no cache.
#[derive(Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl Geocoder {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<String, GeocodeError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(GeocodeError::InvalidCoordinates { lat, lon });
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("accept-language", "en".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body: ReverseResponse = response.json().await?;
        body.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(GeocodeError::NoAddress)
    }

    /// Like [`Geocoder::reverse`] but every failure becomes `"Unknown"`.
    pub async fn address(&self, lat: f64, lon: f64) -> String {
        match self.reverse(lat, lon).await {
            Ok(address) => address,
            Err(err) => {
                error!(lat, lon, %err, "reverse geocoding failed");
                UNKNOWN_ADDRESS.to_string()
            }
        }
    }

    /// Resolve a stored string pair; unparsable input never reaches the network.
    pub async fn address_for(&self, lat: Option<&str>, lon: Option<&str>) -> String {
        match (lat.and_then(parse_coordinate), lon.and_then(parse_coordinate)) {
            (Some(lat), Some(lon)) => self.address(lat, lon).await,
            _ => UNKNOWN_ADDRESS.to_string(),
        }
    }
}
