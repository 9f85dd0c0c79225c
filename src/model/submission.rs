use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A technician's condition report for one scanned device.
///
/// Written once by the public form and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String, // UUID
    pub timestamp: DateTime<Utc>,
    pub serial: String,
    pub username: String,
    pub school: String,
    pub software_version: String,
    pub condition: String,
    #[serde(default)]
    pub gps_location: GpsLocation,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub mfg_location: String,
    #[serde(default)]
    pub lot_number: String,
    /// Copied from the inventory when the serial was known at submission time.
    #[serde(default)]
    pub model: Option<String>,
}

/// Browser-reported coordinates, kept exactly as posted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsLocation {
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub longitude: String,
}

impl GpsLocation {
    pub fn new(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }

    /// Both coordinates as finite floats, or `None` if either is missing or malformed.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = parse_coordinate(&self.latitude)?;
        let lon = parse_coordinate(&self.longitude)?;
        Some((lat, lon))
    }
}

pub(crate) fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Fixed field projection used by the map view.
#[derive(Debug, Clone, Serialize)]
pub struct MapProjection {
    pub serial: String,
    pub model: Option<String>,
    pub school: String,
    pub latitude: String,
    pub longitude: String,
}

impl From<Submission> for MapProjection {
    fn from(s: Submission) -> Self {
        Self {
            serial: s.serial,
            model: s.model,
            school: s.school,
            latitude: s.gps_location.latitude,
            longitude: s.gps_location.longitude,
        }
    }
}
