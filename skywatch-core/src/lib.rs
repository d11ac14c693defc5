//! SkyWatch Core - Airspace model for geofenced contact tracking
//!
//! This crate provides the foundational primitives:
//! - Point-in-polygon geofences with holes and a built-in fallback set
//! - Permissive normalization of raw feed records into typed samples
//! - Threshold and delta anomaly rules
//! - Query tile registry and hex pattern filters

pub mod geofence;
pub mod sample;
pub mod anomaly;
pub mod tiles;
pub mod hexfilter;

pub use geofence::*;
pub use sample::*;
pub use anomaly::*;
pub use tiles::*;
pub use hexfilter::*;

/// Minimum ground speed before a contact is flagged (knots)
pub const MIN_GS_KT: f64 = 35.0;

/// Maximum ground speed before a contact is flagged (knots)
pub const MAX_GS_KT: f64 = 650.0;

/// Minimum barometric altitude before a contact is flagged (feet)
pub const MIN_ALT_FT: i64 = 500;

/// Maximum barometric altitude before a contact is flagged (feet)
pub const MAX_ALT_FT: i64 = 60_000;

/// Maximum implied vertical rate between consecutive samples (feet per minute)
pub const MAX_VS_FPM: f64 = 8000.0;

/// Maximum ground speed change between consecutive samples (knots)
pub const MAX_DGS_KT: f64 = 250.0;
