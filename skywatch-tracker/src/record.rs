//! Persisted first-sighting records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skywatch_core::{join_notes, Anomaly, Sample};

/// Timestamp layout used in the `first_seen_utc` column
pub const FIRST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// One row per hex ever seen.
///
/// Written once, on the first sighting, and never updated afterwards: later
/// sightings of the same hex leave the row untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(default)]
    pub first_seen_utc: String,
    pub hex: String,
    #[serde(default)]
    pub callsign: String,
    #[serde(default)]
    pub registration: String,
    #[serde(rename = "type", default)]
    pub type_code: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub alt_ft: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub gs_kt: Option<i64>,
    /// Anomaly notes at first sighting, `; `-separated
    #[serde(default)]
    pub note: String,
}

impl ContactRecord {
    pub fn from_sample(sample: &Sample, notes: &[Anomaly], first_seen: DateTime<Utc>) -> Self {
        Self {
            first_seen_utc: first_seen.format(FIRST_SEEN_FORMAT).to_string(),
            hex: sample.hex.clone(),
            callsign: sample.callsign.clone().unwrap_or_default(),
            registration: sample.registration.clone().unwrap_or_default(),
            type_code: sample.type_code.clone().unwrap_or_default(),
            lat: sample.lat,
            lon: sample.lon,
            alt_ft: sample.alt_baro_ft,
            gs_kt: sample.ground_speed_kt.map(|gs| gs.round() as i64),
            note: join_notes(notes),
        }
    }
}
