//! Feed query tile registry
//!
//! The upstream feed only answers radius queries, so the watched airspace is
//! covered by a handful of overlapping circles.

use serde::Serialize;

/// Default upstream API root (adsb.fi open data, v2)
pub const DEFAULT_FEED_BASE: &str = "https://opendata.adsb.fi/api/v2";

/// One radius query against the feed
#[derive(Debug, Clone, Serialize)]
pub struct Tile {
    /// Human-readable name
    pub name: &'static str,
    /// Center latitude (decimal degrees)
    pub lat: f64,
    /// Center longitude (decimal degrees)
    pub lon: f64,
    /// Search radius in nautical miles
    pub radius_nm: u32,
}

impl Tile {
    /// Build the query URL under an API root
    pub fn build_url(&self, base: &str) -> String {
        format!(
            "{}/lat/{}/lon/{}/dist/{}",
            base.trim_end_matches('/'),
            self.lat,
            self.lon,
            self.radius_nm
        )
    }
}

/// URL of the military-flagged feed under an API root
pub fn military_url(base: &str) -> String {
    format!("{}/mil", base.trim_end_matches('/'))
}

/// Tiles covering the Nevada Test and Training Range
pub static DEFAULT_TILES: &[Tile] = &[
    Tile {
        name: "Groom Lake",
        lat: 37.246,
        lon: -115.800,
        radius_nm: 40,
    },
    Tile {
        name: "Tonopah",
        lat: 37.790,
        lon: -116.780,
        radius_nm: 45,
    },
    Tile {
        name: "NTTR south-central",
        lat: 37.100,
        lon: -115.850,
        radius_nm: 45,
    },
    Tile {
        name: "NTTR east",
        lat: 37.600,
        lon: -115.200,
        radius_nm: 45,
    },
    Tile {
        name: "NTTR southeast",
        lat: 36.800,
        lon: -115.200,
        radius_nm: 40,
    },
    Tile {
        name: "Nellis",
        lat: 36.300,
        lon: -115.030,
        radius_nm: 30,
    },
];
