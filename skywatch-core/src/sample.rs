//! Aircraft samples normalized from raw feed records
//!
//! Feed records are loosely typed JSON. Every non-identity field goes through
//! a best-effort coercion that yields `None` instead of failing, so a single
//! malformed field never drops the record or aborts a cycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw aircraft record as returned by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// The untouched JSON object
    pub value: Value,
    /// Set for records that came from the military feed
    pub forced_military: bool,
}

impl RawRecord {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            forced_military: false,
        }
    }

    /// A record from the military-flagged feed
    pub fn military(value: Value) -> Self {
        Self {
            value,
            forced_military: true,
        }
    }

    /// Normalized hex identity, if the record has one
    pub fn hex(&self) -> Option<String> {
        coerce_text(self.value.get("hex")).map(|hex| hex.to_lowercase())
    }
}

/// One observation of an aircraft during a polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Lowercase ICAO 24-bit transponder address
    pub hex: String,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Barometric altitude in feet
    pub alt_baro_ft: Option<i64>,
    /// Ground speed in knots
    pub ground_speed_kt: Option<f64>,
    /// Feed-supplied observation time (unix seconds)
    pub observed_at: Option<f64>,
    pub registration: Option<String>,
    /// Short ICAO type designator (e.g. `C17`)
    pub type_code: Option<String>,
    /// Long aircraft description
    pub type_description: Option<String>,
    pub military: bool,
}

impl Sample {
    /// Normalize a raw record. Returns `None` only when the hex is missing.
    pub fn from_record(record: &RawRecord) -> Option<Self> {
        let hex = record.hex()?;
        let fields = record.value.as_object();
        let get = |key: &str| fields.and_then(|f| f.get(key));

        let military = record.forced_military || fields.is_some_and(is_military);

        Some(Self {
            hex,
            callsign: coerce_text(get("flight")),
            lat: coerce_f64(get("lat")),
            lon: coerce_f64(get("lon")),
            alt_baro_ft: coerce_i64(get("alt_baro")),
            ground_speed_kt: coerce_f64(get("gs")),
            observed_at: coerce_f64(get("seen_pos_timestamp")).or_else(|| coerce_f64(get("seen_timestamp"))),
            registration: coerce_text(get("r")).or_else(|| coerce_text(get("registration"))),
            type_code: coerce_text(get("t")).or_else(|| coerce_text(get("type_code"))),
            type_description: coerce_text(get("desc")).or_else(|| coerce_text(get("description"))),
            military,
        })
    }

    /// Normalize a batch, dropping records without a hex
    pub fn normalize_all(records: &[RawRecord]) -> Vec<Self> {
        records.iter().filter_map(Self::from_record).collect()
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HEX:{}  FLT:{}", self.hex, self.callsign.as_deref().unwrap_or("-"))?;

        match self.alt_baro_ft {
            Some(alt) => write!(f, "  ALT:{} ft", alt)?,
            None => write!(f, "  ALT:NA ft")?,
        }
        match self.ground_speed_kt {
            Some(gs) => write!(f, "  GS:{:.0} kt", gs)?,
            None => write!(f, "  GS:NA kt")?,
        }
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => write!(f, "  POS:{},{}", lat, lon)?,
            (Some(lat), None) => write!(f, "  POS:{},NA", lat)?,
            (None, Some(lon)) => write!(f, "  POS:NA,{}", lon)?,
            (None, None) => write!(f, "  POS:NA,NA")?,
        }

        if let Some(reg) = &self.registration {
            write!(f, "  REG:{}", reg)?;
        }
        if let Some(type_code) = &self.type_code {
            write!(f, "  TYPE:{}", type_code)?;
        }
        if self.military {
            write!(f, "  [MIL]")?;
        }
        Ok(())
    }
}

/// A single upstream signal that marks a record as military
type MilitarySignal = fn(&Map<String, Value>) -> bool;

/// Checked in order with short-circuit OR. New signals go at the end.
static MILITARY_SIGNALS: &[MilitarySignal] = &[
    mil_flag,
    military_flag,
    is_military_flag,
    db_flags_bit,
    flags_text,
];

fn mil_flag(fields: &Map<String, Value>) -> bool {
    fields.get("mil").is_some_and(is_truthy)
}

fn military_flag(fields: &Map<String, Value>) -> bool {
    fields.get("military").is_some_and(is_truthy)
}

fn is_military_flag(fields: &Map<String, Value>) -> bool {
    fields.get("is_military").is_some_and(is_truthy)
}

/// readsb database flags: bit 0 is "military"
fn db_flags_bit(fields: &Map<String, Value>) -> bool {
    fields
        .get("dbFlags")
        .and_then(Value::as_u64)
        .is_some_and(|flags| flags & 1 == 1)
}

fn flags_text(fields: &Map<String, Value>) -> bool {
    ["dbFlags", "db_flags", "flags"]
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .any(|text| text.to_lowercase().contains("military"))
}

fn is_military(fields: &Map<String, Value>) -> bool {
    MILITARY_SIGNALS.iter().any(|signal| signal(fields))
}

/// Loose truthiness for flags that may arrive as bools, numbers or strings
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            !s.is_empty() && !matches!(s.as_str(), "0" | "false" | "no" | "n")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Null => false,
    }
}

/// Number or numeric string; anything else (or a non-finite value) is absent
pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Integer coercion; fractional values are rounded to the nearest integer
pub fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    coerce_f64(Some(value))
        .filter(|f| f.abs() < i64::MAX as f64)
        .map(|f| f.round() as i64)
}

/// Trimmed non-empty string
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record() {
        let record = RawRecord::new(json!({
            "hex": " AE1234 ",
            "flight": "RCH123  ",
            "lat": 37.25,
            "lon": -115.8,
            "alt_baro": 24000,
            "gs": 431.2,
            "seen_pos_timestamp": 1_700_000_000.5,
            "r": "05-5140",
            "t": "C17",
            "desc": "BOEING C-17 Globemaster 3"
        }));

        let sample = Sample::from_record(&record).unwrap();
        assert_eq!(sample.hex, "ae1234");
        assert_eq!(sample.callsign.as_deref(), Some("RCH123"));
        assert_eq!(sample.lat, Some(37.25));
        assert_eq!(sample.alt_baro_ft, Some(24000));
        assert_eq!(sample.ground_speed_kt, Some(431.2));
        assert_eq!(sample.observed_at, Some(1_700_000_000.5));
        assert_eq!(sample.registration.as_deref(), Some("05-5140"));
        assert_eq!(sample.type_code.as_deref(), Some("C17"));
        assert!(!sample.military);
    }

    #[test]
    fn test_missing_hex_is_dropped() {
        assert!(Sample::from_record(&RawRecord::new(json!({"flight": "X"}))).is_none());
        assert!(Sample::from_record(&RawRecord::new(json!({"hex": "   "}))).is_none());
        assert!(Sample::from_record(&RawRecord::new(json!("not an object"))).is_none());
    }

    #[test]
    fn test_malformed_fields_become_absent() {
        let record = RawRecord::new(json!({
            "hex": "abc123",
            "flight": "",
            "lat": "north",
            "lon": [1, 2],
            "alt_baro": "ground",
            "gs": null,
            "r": {"nested": true}
        }));

        let sample = Sample::from_record(&record).unwrap();
        assert_eq!(sample.hex, "abc123");
        assert_eq!(sample.callsign, None);
        assert_eq!(sample.lat, None);
        assert_eq!(sample.lon, None);
        assert_eq!(sample.alt_baro_ft, None);
        assert_eq!(sample.ground_speed_kt, None);
        assert_eq!(sample.registration, None);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let record = RawRecord::new(json!({
            "hex": "abc123",
            "lat": "37.5",
            "alt_baro": "12000.6",
            "gs": " 250 "
        }));

        let sample = Sample::from_record(&record).unwrap();
        assert_eq!(sample.lat, Some(37.5));
        assert_eq!(sample.alt_baro_ft, Some(12001));
        assert_eq!(sample.ground_speed_kt, Some(250.0));
        assert_eq!(coerce_f64(Some(&json!("NaN"))), None);
    }

    #[test]
    fn test_military_signals() {
        let cases = [
            json!({"hex": "a1", "mil": true}),
            json!({"hex": "a1", "military": 1}),
            json!({"hex": "a1", "is_military": "yes"}),
            json!({"hex": "a1", "dbFlags": 1}),
            json!({"hex": "a1", "db_flags": "Military, PIA"}),
            json!({"hex": "a1", "flags": "US MILITARY"}),
        ];
        for case in cases {
            let sample = Sample::from_record(&RawRecord::new(case.clone())).unwrap();
            assert!(sample.military, "expected military for {}", case);
        }

        let civil = [
            json!({"hex": "a1", "mil": false}),
            json!({"hex": "a1", "military": "0"}),
            json!({"hex": "a1", "dbFlags": 8}),
            json!({"hex": "a1", "db_flags": "ladd"}),
        ];
        for case in civil {
            let sample = Sample::from_record(&RawRecord::new(case.clone())).unwrap();
            assert!(!sample.military, "expected civil for {}", case);
        }
    }

    #[test]
    fn test_forced_military_overrides_heuristics() {
        let sample = Sample::from_record(&RawRecord::military(json!({"hex": "a1", "mil": false}))).unwrap();
        assert!(sample.military);
    }

    #[test]
    fn test_display() {
        let sample = Sample::from_record(&RawRecord::new(json!({
            "hex": "abc123", "alt_baro": 10000, "gs": 400, "lat": 37.1, "lon": -115.8
        })))
        .unwrap();
        assert_eq!(
            sample.to_string(),
            "HEX:abc123  FLT:-  ALT:10000 ft  GS:400 kt  POS:37.1,-115.8"
        );
    }

    #[test]
    fn test_normalize_all_drops_hexless() {
        let records = vec![
            RawRecord::new(json!({"hex": "a1"})),
            RawRecord::new(json!({"lat": 1.0})),
            RawRecord::new(json!({"hex": "b2"})),
        ];
        let samples = Sample::normalize_all(&records);
        assert_eq!(samples.len(), 2);
    }
}
