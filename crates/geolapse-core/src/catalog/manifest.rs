use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::align::bilinear_sample;
use crate::consts::ALPHA_BAND;
use crate::error::{GeolapseError, Result};
use crate::geometry::{BoundingBox, ResolvedGeometry};
use crate::scene::SceneDescriptor;

use super::{CatalogQuery, RasterRequest, RasterService, RasterStack, SceneCatalog, ServiceError};

/// One scene entry of an archive manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestScene {
    #[serde(flatten)]
    pub descriptor: SceneDescriptor,
    /// Lon/lat extent covered by the band images.
    pub footprint: BoundingBox,
    /// Band name to image file, relative to the manifest's directory.
    pub bands: BTreeMap<String, PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub scenes: Vec<ManifestScene>,
}

/// Scene archive on the local filesystem: a JSON manifest plus one grayscale
/// image per band and scene, each covering the scene's lon/lat footprint.
#[derive(Debug)]
pub struct ManifestArchive {
    scenes: Vec<ManifestScene>,
}

impl ManifestArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&contents)?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::from_manifest(manifest, root))
    }

    /// Build from an in-memory manifest; relative band paths are joined to `root`.
    pub fn from_manifest(manifest: Manifest, root: &Path) -> Self {
        let scenes: Vec<ManifestScene> = manifest
            .scenes
            .into_iter()
            .map(|mut scene| {
                for file in scene.bands.values_mut() {
                    if file.is_relative() {
                        *file = root.join(&*file);
                    }
                }
                scene
            })
            .collect();
        info!(scenes = scenes.len(), root = %root.display(), "Opened scene archive");
        Self { scenes }
    }

    fn scene(&self, id: &str) -> std::result::Result<&ManifestScene, ServiceError> {
        self.scenes
            .iter()
            .find(|s| s.descriptor.id == id)
            .ok_or_else(|| ServiceError::Rejected(format!("unknown scene {id}")))
    }
}

impl SceneCatalog for ManifestArchive {
    fn query(&self, query: &CatalogQuery) -> std::result::Result<Vec<SceneDescriptor>, ServiceError> {
        Ok(self
            .scenes
            .iter()
            .filter(|s| query.products.contains(&s.descriptor.product))
            .filter(|s| query.time_range.contains(&s.descriptor.acquired))
            .filter(|s| s.footprint.intersects(&query.bbox))
            .map(|s| s.descriptor.clone())
            .collect())
    }
}

impl RasterService for ManifestArchive {
    fn raster(&self, request: &RasterRequest) -> std::result::Result<RasterStack, ServiceError> {
        if let Some(crs) = &request.crs {
            if !crs.eq_ignore_ascii_case("EPSG:4326") {
                return Err(ServiceError::Rejected(format!(
                    "archive grids are lon/lat only, cannot project to {crs}"
                )));
            }
        }
        if let Some(level) = request.processing_level {
            debug!(%level, "Archive stores a single processing level, ignoring request");
        }

        let grid = &request.grid;
        let n = request.scene_ids.len();
        let mut data = Array4::<f32>::zeros((n, grid.rows, grid.cols, request.bands.len()));
        let mut valid = Array3::<bool>::from_elem((n, grid.rows, grid.cols), false);

        for (s, id) in request.scene_ids.iter().enumerate() {
            let scene = self.scene(id)?;
            let mut scene_valid = valid.index_axis_mut(Axis(0), s);
            mark_covered(grid, &scene.footprint, &mut scene_valid);

            for (b, band) in request.bands.iter().enumerate() {
                let mut out = data.index_axis_mut(Axis(0), s);
                let mut out = out.index_axis_mut(Axis(2), b);
                match scene.bands.get(band) {
                    Some(file) => {
                        let source = load_band(file)?;
                        resample_band(grid, &scene.footprint, &source, &mut out);
                    }
                    None if band == ALPHA_BAND => {
                        out.assign(&scene_valid.mapv(|v| if v { 1.0 } else { 0.0 }));
                    }
                    None => {
                        return Err(ServiceError::Rejected(format!(
                            "scene {id} has no band {band:?}"
                        )))
                    }
                }
            }
        }

        Ok(RasterStack {
            data,
            valid: Some(valid),
        })
    }
}

fn load_band(path: &Path) -> std::result::Result<Array2<f32>, ServiceError> {
    let img = image::open(path)
        .map_err(|e| ServiceError::Rejected(format!("failed to read {}: {e}", path.display())))?;
    let gray = img.to_luma32f();
    let (w, h) = gray.dimensions();
    Array2::from_shape_vec((h as usize, w as usize), gray.into_raw())
        .map_err(|e| ServiceError::Rejected(format!("bad band image {}: {e}", path.display())))
}

/// Source pixel coordinates (y, x) of a lon/lat inside a footprint image of `h` x `w`.
fn source_coords(footprint: &BoundingBox, h: usize, w: usize, lon: f64, lat: f64) -> (f64, f64) {
    let x = (lon - footprint.min_lon) / footprint.width_deg() * w as f64 - 0.5;
    let y = (footprint.max_lat - lat) / footprint.height_deg() * h as f64 - 0.5;
    (y, x)
}

fn inside(footprint: &BoundingBox, lon: f64, lat: f64) -> bool {
    (footprint.min_lon..=footprint.max_lon).contains(&lon)
        && (footprint.min_lat..=footprint.max_lat).contains(&lat)
}

fn mark_covered(
    grid: &ResolvedGeometry,
    footprint: &BoundingBox,
    valid: &mut ndarray::ArrayViewMut2<'_, bool>,
) {
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let (lon, lat) = grid.pixel_center(row, col);
            valid[[row, col]] = inside(footprint, lon, lat);
        }
    }
}

fn resample_band(
    grid: &ResolvedGeometry,
    footprint: &BoundingBox,
    source: &Array2<f32>,
    out: &mut ndarray::ArrayViewMut2<'_, f32>,
) {
    let (h, w) = source.dim();
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let (lon, lat) = grid.pixel_center(row, col);
            if !inside(footprint, lon, lat) {
                continue;
            }
            let (y, x) = source_coords(footprint, h, w, lon, lat);
            let y = y.clamp(0.0, (h - 1) as f64);
            let x = x.clamp(0.0, (w - 1) as f64);
            out[[row, col]] = bilinear_sample(source, y, x);
        }
    }
}

/// Error type adapter for callers that open an archive from a config path.
pub fn open_archive(path: &Path) -> Result<ManifestArchive> {
    ManifestArchive::open(path).map_err(|e| match e {
        GeolapseError::Io(io) => {
            GeolapseError::catalog(format!("cannot open archive {}: {io}", path.display()))
        }
        other => other,
    })
}
