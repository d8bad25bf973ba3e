use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::consts::METERS_PER_DEGREE;
use crate::error::{GeolapseError, Result};

/// Axis-aligned lon/lat rectangle in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn width_deg(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Closed GeoJSON polygon ring around the box.
    pub fn to_polygon(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [self.min_lon, self.min_lat],
                [self.max_lon, self.min_lat],
                [self.max_lon, self.max_lat],
                [self.min_lon, self.max_lat],
                [self.min_lon, self.min_lat],
            ]]
        })
    }
}

/// How a polygon area is turned into a pixel grid.
#[derive(Clone, Debug, PartialEq)]
pub enum PolygonGrid {
    /// Metres per pixel; the shape follows from the polygon's extent.
    Resolution(f64),
    /// Square grid of `tilesize + 2 * pad` pixels per side.
    Shape { tilesize: usize, pad: usize },
}

/// The single area-of-interest source for a run.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    /// Square tile centered on a point.
    Point {
        lat: f64,
        lon: f64,
        resolution: f64,
        tilesize: usize,
        pad: usize,
    },
    /// Explicit GeoJSON Polygon or MultiPolygon geometry.
    Polygon { geometry: Value, grid: PolygonGrid },
}

/// A geometry fixed to a lon/lat footprint and a pixel grid.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedGeometry {
    pub bbox: BoundingBox,
    pub rows: usize,
    pub cols: usize,
    /// Approximate ground size of a pixel in metres.
    pub resolution: f64,
    /// GeoJSON geometry of the area, as used for the bbox export.
    pub footprint: Value,
}

impl ResolvedGeometry {
    /// Width over height of the pixel grid.
    pub fn natural_aspect(&self) -> f64 {
        self.cols as f64 / self.rows as f64
    }

    /// Lon/lat of the center of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let lon = self.bbox.min_lon + (col as f64 + 0.5) / self.cols as f64 * self.bbox.width_deg();
        let lat = self.bbox.max_lat - (row as f64 + 0.5) / self.rows as f64 * self.bbox.height_deg();
        (lon, lat)
    }
}

impl Geometry {
    /// Read a GeoJSON file and keep its first geometry.
    pub fn from_geojson_file(path: &Path, grid: PolygonGrid) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)?;
        let geometry = extract_geometry(value)?;
        Ok(Self::Polygon { geometry, grid })
    }

    pub fn resolve(&self) -> Result<ResolvedGeometry> {
        match self {
            Self::Point {
                lat,
                lon,
                resolution,
                tilesize,
                pad,
            } => resolve_point(*lat, *lon, *resolution, *tilesize, *pad),
            Self::Polygon { geometry, grid } => resolve_polygon(geometry, grid),
        }
    }
}

fn resolve_point(
    lat: f64,
    lon: f64,
    resolution: f64,
    tilesize: usize,
    pad: usize,
) -> Result<ResolvedGeometry> {
    check_lat_lon(lat, lon)?;
    check_resolution(resolution)?;
    if tilesize == 0 {
        return Err(GeolapseError::config("tilesize must be > 0"));
    }

    let side = tilesize + 2 * pad;
    let half_m = side as f64 * resolution / 2.0;
    let dlat = half_m / METERS_PER_DEGREE;
    let dlon = half_m / (METERS_PER_DEGREE * lat.to_radians().cos().max(1e-6));
    let bbox = BoundingBox {
        min_lon: lon - dlon,
        min_lat: lat - dlat,
        max_lon: lon + dlon,
        max_lat: lat + dlat,
    };

    Ok(ResolvedGeometry {
        footprint: bbox.to_polygon(),
        bbox,
        rows: side,
        cols: side,
        resolution,
    })
}

fn resolve_polygon(geometry: &Value, grid: &PolygonGrid) -> Result<ResolvedGeometry> {
    let bbox = polygon_bbox(geometry)?;
    let (_, center_lat) = bbox.center();
    let width_m = bbox.width_deg() * METERS_PER_DEGREE * center_lat.to_radians().cos().max(1e-6);
    let height_m = bbox.height_deg() * METERS_PER_DEGREE;

    let (rows, cols, resolution) = match grid {
        PolygonGrid::Resolution(res) => {
            check_resolution(*res)?;
            let cols = (width_m / res).ceil().max(1.0) as usize;
            let rows = (height_m / res).ceil().max(1.0) as usize;
            (rows, cols, *res)
        }
        PolygonGrid::Shape { tilesize, pad } => {
            if *tilesize == 0 {
                return Err(GeolapseError::config("tilesize must be > 0"));
            }
            let side = tilesize + 2 * pad;
            (side, side, width_m.max(height_m) / side as f64)
        }
    };

    Ok(ResolvedGeometry {
        bbox,
        rows,
        cols,
        resolution,
        footprint: geometry.clone(),
    })
}

fn check_lat_lon(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(GeolapseError::config(format!(
            "lat/lon {lat} {lon} is outside [-90, 90] x [-180, 180]"
        )));
    }
    Ok(())
}

fn check_resolution(resolution: f64) -> Result<()> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(GeolapseError::config(format!(
            "resolution {resolution} is invalid"
        )));
    }
    Ok(())
}

/// Pick the geometry out of a FeatureCollection, Feature, or bare geometry.
pub fn extract_geometry(value: Value) -> Result<Value> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| GeolapseError::config("FeatureCollection has no features"))?;
            if features.len() > 1 {
                warn!(
                    features = features.len(),
                    "GeoJSON has several features, only the first is used"
                );
            }
            extract_geometry(features[0].clone())
        }
        Some("Feature") => {
            let geometry = value
                .get("geometry")
                .cloned()
                .ok_or_else(|| GeolapseError::config("Feature has no geometry"))?;
            extract_geometry(geometry)
        }
        Some("Polygon" | "MultiPolygon") => Ok(value),
        Some(other) => Err(GeolapseError::config(format!(
            "unsupported GeoJSON geometry type {other:?}"
        ))),
        None => Err(GeolapseError::config("GeoJSON object has no \"type\"")),
    }
}

/// Bounding box over every coordinate pair of a Polygon/MultiPolygon.
pub fn polygon_bbox(geometry: &Value) -> Result<BoundingBox> {
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| GeolapseError::config("geometry has no coordinates"))?;

    let mut bbox = BoundingBox {
        min_lon: f64::INFINITY,
        min_lat: f64::INFINITY,
        max_lon: f64::NEG_INFINITY,
        max_lat: f64::NEG_INFINITY,
    };
    collect_positions(coords, &mut |lon, lat| {
        bbox.min_lon = bbox.min_lon.min(lon);
        bbox.min_lat = bbox.min_lat.min(lat);
        bbox.max_lon = bbox.max_lon.max(lon);
        bbox.max_lat = bbox.max_lat.max(lat);
    });

    if !(bbox.min_lon.is_finite() && bbox.max_lat.is_finite()) {
        return Err(GeolapseError::config("geometry has no positions"));
    }
    if bbox.width_deg() <= 0.0 || bbox.height_deg() <= 0.0 {
        return Err(GeolapseError::config("geometry has zero area"));
    }
    check_lat_lon(bbox.min_lat, bbox.min_lon)?;
    check_lat_lon(bbox.max_lat, bbox.max_lon)?;
    Ok(bbox)
}

fn collect_positions(value: &Value, visit: &mut impl FnMut(f64, f64)) {
    let Some(items) = value.as_array() else {
        return;
    };
    match (items.first().and_then(Value::as_f64), items.get(1).and_then(Value::as_f64)) {
        (Some(lon), Some(lat)) => visit(lon, lat),
        _ => {
            for item in items {
                collect_positions(item, visit);
            }
        }
    }
}
