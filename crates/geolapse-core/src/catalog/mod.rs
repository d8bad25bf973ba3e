//! Capability interfaces for the imagery platform.
//!
//! The pipeline only talks to [`SceneCatalog`] and [`RasterService`]; concrete
//! backends live in the submodules.

pub mod manifest;
pub mod memory;

use std::collections::HashSet;
use std::time::Duration;

use ndarray::{Array3, Array4, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::{GeolapseError, Result};
use crate::geometry::{BoundingBox, ResolvedGeometry};
use crate::scene::{SceneDescriptor, TimeRange};

pub use manifest::ManifestArchive;
pub use memory::InMemoryCatalog;

/// Failure reported by a remote collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The service could not be reached or asked us to come back later.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("call timed out after {0:?}")]
    TimedOut(Duration),
}

impl ServiceError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }
}

/// Processing level requested from the rasterization service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLevel {
    Toa,
    Surface,
}

impl std::str::FromStr for ProcessingLevel {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "toa" => Ok(Self::Toa),
            "surface" => Ok(Self::Surface),
            other => Err(GeolapseError::config(format!(
                "processing level {other:?} is invalid (toa | surface)"
            ))),
        }
    }
}

impl std::fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Toa => write!(f, "toa"),
            Self::Surface => write!(f, "surface"),
        }
    }
}

/// Metadata search parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogQuery {
    pub bbox: BoundingBox,
    pub time_range: TimeRange,
    pub products: Vec<String>,
    pub processing_level: Option<ProcessingLevel>,
    pub crs: Option<String>,
}

/// One rasterization call: a batch of scenes onto a fixed grid.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterRequest {
    pub scene_ids: Vec<String>,
    pub grid: ResolvedGeometry,
    /// Bands in output order; may include `alpha`.
    pub bands: Vec<String>,
    pub crs: Option<String>,
    pub processing_level: Option<ProcessingLevel>,
}

/// Per-scene pixels for one batch.
#[derive(Clone, Debug)]
pub struct RasterStack {
    /// shape = (scenes, rows, cols, bands), scenes in request order
    pub data: Array4<f32>,
    /// shape = (scenes, rows, cols); `true` marks valid pixels
    pub valid: Option<Array3<bool>>,
}

impl RasterStack {
    pub fn scene_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }
}

/// Scene metadata search.
pub trait SceneCatalog: Send + Sync {
    fn query(&self, query: &CatalogQuery) -> std::result::Result<Vec<SceneDescriptor>, ServiceError>;
}

/// Pixel retrieval for a batch of scenes.
pub trait RasterService: Send + Sync {
    fn raster(&self, request: &RasterRequest) -> std::result::Result<RasterStack, ServiceError>;
}

/// Run a catalog query, mapping every failure to [`GeolapseError::Catalog`].
///
/// Scenes listed under more than one product are kept once, at their first
/// position. An empty result is an error: there is nothing to animate.
pub fn find_scenes(catalog: &dyn SceneCatalog, query: &CatalogQuery) -> Result<Vec<SceneDescriptor>> {
    if query.time_range.start >= query.time_range.end {
        return Err(GeolapseError::catalog(format!(
            "time range {} .. {} is empty",
            query.time_range.start, query.time_range.end
        )));
    }
    if query.products.is_empty() {
        return Err(GeolapseError::catalog("no product ids to search"));
    }

    let found = catalog
        .query(query)
        .map_err(|e| GeolapseError::catalog(e.to_string()))?;
    let returned = found.len();
    let mut seen = HashSet::new();
    let scenes: Vec<SceneDescriptor> = found
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect();
    info!(
        scenes = scenes.len(),
        duplicates = returned - scenes.len(),
        products = ?query.products,
        start = %query.time_range.start,
        end = %query.time_range.end,
        "Catalog query complete"
    );

    if scenes.is_empty() {
        return Err(GeolapseError::catalog(
            "found no scenes for the requested area, time range and products",
        ));
    }
    Ok(scenes)
}
