//! Flight-parameter anomaly rules
//!
//! Threshold rules look at the current sample alone. Delta rules compare it
//! with the previous sample of the same contact and only run when that
//! sample exists and the elapsed time is positive. A missing field skips the
//! rules that need it and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Sample, MAX_ALT_FT, MAX_DGS_KT, MAX_GS_KT, MAX_VS_FPM, MIN_ALT_FT, MIN_GS_KT};

/// A single anomaly note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Anomaly {
    /// Ground speed above [`MAX_GS_KT`]
    HighGroundSpeed(f64),
    /// Ground speed below [`MIN_GS_KT`]
    LowGroundSpeed(f64),
    /// Altitude above [`MAX_ALT_FT`]
    HighAltitude(i64),
    /// Altitude below [`MIN_ALT_FT`]
    LowAltitude(i64),
    /// Ground speed changed by more than [`MAX_DGS_KT`] since the previous sample
    GroundSpeedJump(f64),
    /// Implied vertical rate beyond [`MAX_VS_FPM`] (signed, feet per minute)
    VerticalRate(f64),
}

impl Anomaly {
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::GroundSpeedJump(_) | Self::VerticalRate(_))
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighGroundSpeed(gs) => write!(f, "high GS {:.0} kt", gs),
            Self::LowGroundSpeed(gs) => write!(f, "low GS {:.0} kt", gs),
            Self::HighAltitude(alt) => write!(f, "high ALT {} ft", alt),
            Self::LowAltitude(alt) => write!(f, "low ALT {} ft", alt),
            Self::GroundSpeedJump(delta) => write!(f, "GS jump {:.0} kt", delta),
            Self::VerticalRate(fpm) => write!(f, "vertical anomaly {:+.0} fpm", fpm),
        }
    }
}

/// Classify the current sample against the previous one
pub fn classify(current: &Sample, previous: Option<&Sample>, elapsed_secs: Option<f64>) -> Vec<Anomaly> {
    let mut notes = Vec::new();

    if let Some(gs) = current.ground_speed_kt {
        if gs > MAX_GS_KT {
            notes.push(Anomaly::HighGroundSpeed(gs));
        } else if gs < MIN_GS_KT {
            notes.push(Anomaly::LowGroundSpeed(gs));
        }
    }

    if let Some(alt) = current.alt_baro_ft {
        if alt > MAX_ALT_FT {
            notes.push(Anomaly::HighAltitude(alt));
        } else if alt < MIN_ALT_FT {
            notes.push(Anomaly::LowAltitude(alt));
        }
    }

    let (Some(previous), Some(elapsed)) = (previous, elapsed_secs) else {
        return notes;
    };
    if elapsed <= 0.0 || !elapsed.is_finite() {
        return notes;
    }

    if let (Some(gs), Some(prev_gs)) = (current.ground_speed_kt, previous.ground_speed_kt) {
        let delta = (gs - prev_gs).abs();
        if delta > MAX_DGS_KT {
            notes.push(Anomaly::GroundSpeedJump(delta));
        }
    }

    if let (Some(alt), Some(prev_alt)) = (current.alt_baro_ft, previous.alt_baro_ft) {
        let vs_fpm = ((alt as f64 - prev_alt as f64) / elapsed) * 60.0;
        if vs_fpm.abs() > MAX_VS_FPM {
            notes.push(Anomaly::VerticalRate(vs_fpm));
        }
    }

    notes
}

/// Join notes for display and persistence (empty string when none fired)
pub fn join_notes(notes: &[Anomaly]) -> String {
    notes.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
