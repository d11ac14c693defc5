//! Restricted-area geofences
//!
//! Polygons are tested with planar ray casting in (longitude, latitude)
//! space. That is accurate enough for regions tens of nautical miles across
//! and is not meant to be used near the poles or the antimeridian.
//!
//! Boundary files may be either a GeoJSON FeatureCollection of
//! Polygon/MultiPolygon features (vertices in `[lon, lat]` order) or a
//! simplified document of the form
//! `{"polygons": [[[[lat, lon], ...], <holes>...], ...]}`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Added to the edge y-span so horizontal edges never divide by zero
const EDGE_EPSILON: f64 = 1e-12;

/// Errors raised while building a geofence
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("Failed to read boundary file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid boundary JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Unrecognized boundary document (expected a FeatureCollection or {{\"polygons\": [...]}})")]
    UnrecognizedShape,

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Ring has {0} vertices, at least 3 are required")]
    DegenerateRing(usize),

    #[error("Polygon has no exterior ring")]
    MissingExterior,

    #[error("Boundary document contains no polygons")]
    Empty,
}

/// A WGS-84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One closed boundary of a polygon.
///
/// The vertex sequence is treated as implicitly closed, so the first vertex
/// may or may not be repeated at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    vertices: Vec<Coord>,
}

impl Ring {
    pub fn new(vertices: Vec<Coord>) -> Result<Self, GeofenceError> {
        if vertices.len() < 3 {
            return Err(GeofenceError::DegenerateRing(vertices.len()));
        }
        Ok(Self { vertices })
    }

    /// Build a ring from `(lat, lon)` pairs
    pub fn from_lat_lon(pairs: &[(f64, f64)]) -> Result<Self, GeofenceError> {
        Self::new(pairs.iter().map(|&(lat, lon)| Coord::new(lat, lon)).collect())
    }

    pub fn vertices(&self) -> &[Coord] {
        &self.vertices
    }

    /// Even-odd ray cast from the point towards +x (east).
    ///
    /// Points exactly on a horizontal edge get a deterministic but arbitrary
    /// answer; boundary points are not part of the contract.
    pub fn contains(&self, point: Coord) -> bool {
        let (x, y) = (point.lon, point.lat);
        let n = self.vertices.len();
        let mut inside = false;

        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let (xi, yi) = (a.lon, a.lat);
            let (xj, yj) = (b.lon, b.lat);

            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi + EDGE_EPSILON) + xi {
                inside = !inside;
            }
        }

        inside
    }
}

/// A polygon: ring 0 is the exterior, every further ring is a hole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Display name (from feature properties or the fallback table)
    pub name: Option<String>,
    rings: Vec<Ring>,
}

impl Polygon {
    pub fn new(rings: Vec<Ring>) -> Result<Self, GeofenceError> {
        if rings.is_empty() {
            return Err(GeofenceError::MissingExterior);
        }
        Ok(Self { name: None, rings })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn exterior(&self) -> &Ring {
        &self.rings[0]
    }

    pub fn holes(&self) -> &[Ring] {
        &self.rings[1..]
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    /// Inside the exterior ring and outside every hole
    pub fn contains(&self, point: Coord) -> bool {
        self.exterior().contains(point) && !self.holes().iter().any(|hole| hole.contains(point))
    }
}

/// Test a point against a single polygon
pub fn contains(point: Coord, polygon: &Polygon) -> bool {
    polygon.contains(point)
}

/// True when any polygon contains the position.
///
/// A missing latitude or longitude is never contained.
pub fn contains_any(lat: Option<f64>, lon: Option<f64>, polygons: &[Polygon]) -> bool {
    let (Some(lat), Some(lon)) = (lat, lon) else {
        return false;
    };
    let point = Coord::new(lat, lon);
    polygons.iter().any(|polygon| polygon.contains(point))
}

/// Where the active geofence came from
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceSource {
    /// Loaded from a boundary file
    File(PathBuf),
    /// Built-in approximate boxes; `reason` is set when a file failed to load
    Fallback { reason: Option<String> },
}

impl fmt::Display for GeofenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Fallback { reason: None } => write!(f, "built-in approximate boxes"),
            Self::Fallback { reason: Some(reason) } => {
                write!(f, "built-in approximate boxes (boundary file rejected: {})", reason)
            }
        }
    }
}

/// The full set of configured restricted areas. Never empty.
#[derive(Debug, Clone)]
pub struct GeofenceSet {
    polygons: Vec<Polygon>,
    source: GeofenceSource,
}

impl GeofenceSet {
    pub fn new(polygons: Vec<Polygon>, source: GeofenceSource) -> Result<Self, GeofenceError> {
        if polygons.is_empty() {
            return Err(GeofenceError::Empty);
        }
        Ok(Self { polygons, source })
    }

    /// Load polygons from a boundary file
    pub fn load(path: &Path) -> Result<Self, GeofenceError> {
        let text = fs::read_to_string(path)?;
        let polygons = parse_boundaries(&text)?;
        Self::new(polygons, GeofenceSource::File(path.to_path_buf()))
    }

    /// Load a boundary file, falling back to the built-in boxes.
    ///
    /// Never fails; inspect [`GeofenceSet::source`] to learn whether the
    /// fallback was used and why.
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No boundary file given, using built-in approximate polygons");
            return Self::fallback(None);
        };

        match Self::load(path) {
            Ok(set) => {
                info!("Loaded {} polygons from {}", set.len(), path.display());
                set
            }
            Err(e) => {
                warn!("Boundary file {} rejected: {}", path.display(), e);
                warn!("Using built-in approximate polygons");
                Self::fallback(Some(e.to_string()))
            }
        }
    }

    /// The built-in approximate bounding boxes
    pub fn fallback(reason: Option<String>) -> Self {
        Self {
            polygons: fallback_polygons(),
            source: GeofenceSource::Fallback { reason },
        }
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn source(&self) -> &GeofenceSource {
        &self.source
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, GeofenceSource::Fallback { .. })
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn contains_any(&self, lat: Option<f64>, lon: Option<f64>) -> bool {
        contains_any(lat, lon, &self.polygons)
    }
}

/// Approximate boxes around the NTTR complex: (name, min_lat, max_lat, min_lon, max_lon).
///
/// These are NOT the published R-4806/4807/4808/4809 boundaries.
static FALLBACK_BOXES: &[(&str, f64, f64, f64, f64)] = &[
    ("Groom Lake (approx)", 37.05, 37.55, -116.15, -115.30),
    ("Tonopah (approx)", 37.55, 38.10, -117.20, -116.30),
    ("NTTR central (approx)", 36.80, 38.30, -116.60, -115.00),
    ("NTTR south (approx)", 36.50, 37.05, -116.40, -115.20),
];

fn fallback_polygons() -> Vec<Polygon> {
    FALLBACK_BOXES
        .iter()
        .map(|&(name, min_lat, max_lat, min_lon, max_lon)| {
            let exterior = Ring {
                vertices: vec![
                    Coord::new(min_lat, min_lon),
                    Coord::new(min_lat, max_lon),
                    Coord::new(max_lat, max_lon),
                    Coord::new(max_lat, min_lon),
                    Coord::new(min_lat, min_lon),
                ],
            };
            Polygon {
                name: Some(name.to_string()),
                rings: vec![exterior],
            }
        })
        .collect()
}

/// Simplified boundary document with `[lat, lon]` pairs
#[derive(Debug, Deserialize)]
struct SimpleBoundaries {
    polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

/// Parse a boundary document into polygons
pub fn parse_boundaries(text: &str) -> Result<Vec<Polygon>, GeofenceError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let kind = value.get("type").and_then(|t| t.as_str());
    let polygons = match kind {
        Some("FeatureCollection" | "Feature" | "Polygon" | "MultiPolygon" | "GeometryCollection") => {
            parse_geojson(GeoJson::from_json_value(value)?)?
        }
        _ if value.get("polygons").is_some() => parse_simple(value)?,
        _ => return Err(GeofenceError::UnrecognizedShape),
    };

    if polygons.is_empty() {
        return Err(GeofenceError::Empty);
    }
    Ok(polygons)
}

fn parse_simple(value: serde_json::Value) -> Result<Vec<Polygon>, GeofenceError> {
    let doc: SimpleBoundaries = serde_json::from_value(value)?;

    doc.polygons
        .into_iter()
        .map(|rings| {
            let rings = rings
                .into_iter()
                .map(|ring| Ring::new(ring.into_iter().map(|[lat, lon]| Coord::new(lat, lon)).collect()))
                .collect::<Result<Vec<_>, _>>()?;
            Polygon::new(rings)
        })
        .collect()
}

fn parse_geojson(geojson: GeoJson) -> Result<Vec<Polygon>, GeofenceError> {
    let mut polygons = Vec::new();

    match geojson {
        GeoJson::FeatureCollection(collection) => {
            for feature in collection.features {
                let name = feature_name(&feature);
                if let Some(geometry) = feature.geometry {
                    collect_geometry(&geometry.value, name.as_deref(), &mut polygons)?;
                }
            }
        }
        GeoJson::Feature(feature) => {
            let name = feature_name(&feature);
            if let Some(geometry) = feature.geometry {
                collect_geometry(&geometry.value, name.as_deref(), &mut polygons)?;
            }
        }
        GeoJson::Geometry(geometry) => collect_geometry(&geometry.value, None, &mut polygons)?,
    }

    Ok(polygons)
}

fn feature_name(feature: &geojson::Feature) -> Option<String> {
    ["name", "NAME", "designator"]
        .iter()
        .find_map(|key| feature.property(key).and_then(|v| v.as_str()).map(str::to_string))
}

fn collect_geometry(
    value: &geojson::Value,
    name: Option<&str>,
    out: &mut Vec<Polygon>,
) -> Result<(), GeofenceError> {
    match value {
        geojson::Value::Polygon(rings) => out.push(polygon_from_lon_lat(rings, name)?),
        geojson::Value::MultiPolygon(parts) => {
            for rings in parts {
                out.push(polygon_from_lon_lat(rings, name)?);
            }
        }
        geojson::Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                collect_geometry(&geometry.value, name, out)?;
            }
        }
        _ => debug!("Skipping non-polygon geometry"),
    }
    Ok(())
}

/// GeoJSON positions are `[lon, lat, (alt)]`
fn polygon_from_lon_lat(
    rings: &[Vec<geojson::Position>],
    name: Option<&str>,
) -> Result<Polygon, GeofenceError> {
    let rings = rings
        .iter()
        .map(|ring| {
            let vertices = ring
                .iter()
                .map(|position| match position.as_slice() {
                    [lon, lat, ..] => Ok(Coord::new(*lat, *lon)),
                    _ => Err(GeofenceError::InvalidPosition(format!("{:?}", position))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ring::new(vertices)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let polygon = Polygon::new(rings)?;
    Ok(match name {
        Some(name) => polygon.with_name(name),
        None => polygon,
    })
}
