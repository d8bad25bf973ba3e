use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ndarray::{Array2, Array3, Array4, Axis};

use crate::consts::ALPHA_BAND;
use crate::geometry::BoundingBox;
use crate::scene::SceneDescriptor;

use super::{CatalogQuery, RasterRequest, RasterService, RasterStack, SceneCatalog, ServiceError};

/// Pixels held for one scene of an [`InMemoryCatalog`].
#[derive(Clone, Debug)]
pub struct SceneRaster {
    pub bands: Vec<String>,
    /// shape = (rows, cols, bands)
    pub data: Array3<f32>,
    pub valid: Option<Array2<bool>>,
}

#[derive(Clone, Debug)]
struct Entry {
    descriptor: SceneDescriptor,
    footprint: Option<BoundingBox>,
    raster: Option<SceneRaster>,
}

#[derive(Clone, Debug)]
struct Failure {
    error: ServiceError,
    /// `None` fails forever; `Some(n)` fails the next `n` calls.
    remaining: Option<usize>,
}

/// Catalog and rasterization service backed by in-process arrays.
///
/// Records every call so tests can assert on batching, and can be told to fail
/// or stall for chosen scenes.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: Vec<Entry>,
    unreachable: Option<String>,
    raster_delay: Option<Duration>,
    failures: Mutex<HashMap<String, Failure>>,
    query_calls: AtomicUsize,
    raster_calls: Mutex<Vec<Vec<String>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scene whose raster covers the whole request grid.
    pub fn with_scene(mut self, descriptor: SceneDescriptor, raster: SceneRaster) -> Self {
        self.entries.push(Entry {
            descriptor,
            footprint: None,
            raster: Some(raster),
        });
        self
    }

    /// Add metadata only; rasterizing this scene is rejected.
    pub fn with_descriptor(mut self, descriptor: SceneDescriptor) -> Self {
        self.entries.push(Entry {
            descriptor,
            footprint: None,
            raster: None,
        });
        self
    }

    /// Restrict the most recently added scene to a footprint.
    pub fn with_footprint(mut self, footprint: BoundingBox) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.footprint = Some(footprint);
        }
        self
    }

    /// Make every catalog query fail as if the service were down.
    pub fn unreachable(mut self, message: impl Into<String>) -> Self {
        self.unreachable = Some(message.into());
        self
    }

    /// Sleep this long inside every raster call.
    pub fn with_raster_delay(mut self, delay: Duration) -> Self {
        self.raster_delay = Some(delay);
        self
    }

    /// Fail every raster call that includes `scene_id`.
    pub fn fail_scene(self, scene_id: impl Into<String>, error: ServiceError) -> Self {
        self.insert_failure(scene_id.into(), error, None)
    }

    /// Fail the next `times` raster calls that include `scene_id`.
    pub fn fail_scene_times(
        self,
        scene_id: impl Into<String>,
        error: ServiceError,
        times: usize,
    ) -> Self {
        self.insert_failure(scene_id.into(), error, Some(times))
    }

    fn insert_failure(self, id: String, error: ServiceError, remaining: Option<usize>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(id, Failure { error, remaining });
        }
        self
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::Relaxed)
    }

    /// Scene id batches of every raster call so far, in call order.
    pub fn raster_calls(&self) -> Vec<Vec<String>> {
        self.raster_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn injected_failure(&self, ids: &[String]) -> Option<ServiceError> {
        let mut failures = self.failures.lock().ok()?;
        for id in ids {
            if let Some(failure) = failures.get_mut(id) {
                match failure.remaining {
                    None => return Some(failure.error.clone()),
                    Some(0) => {}
                    Some(ref mut n) => {
                        *n -= 1;
                        return Some(failure.error.clone());
                    }
                }
            }
        }
        None
    }

    fn scene_raster(&self, id: &str) -> Result<&SceneRaster, ServiceError> {
        self.entries
            .iter()
            .find(|e| e.descriptor.id == id)
            .and_then(|e| e.raster.as_ref())
            .ok_or_else(|| ServiceError::Rejected(format!("no pixels for scene {id}")))
    }
}

impl SceneCatalog for InMemoryCatalog {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<SceneDescriptor>, ServiceError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = &self.unreachable {
            return Err(ServiceError::Unavailable(message.clone()));
        }

        Ok(self
            .entries
            .iter()
            .filter(|e| query.products.contains(&e.descriptor.product))
            .filter(|e| query.time_range.contains(&e.descriptor.acquired))
            .filter(|e| e.footprint.is_none_or(|fp| fp.intersects(&query.bbox)))
            .map(|e| e.descriptor.clone())
            .collect())
    }
}

impl RasterService for InMemoryCatalog {
    fn raster(&self, request: &RasterRequest) -> Result<RasterStack, ServiceError> {
        if let Ok(mut calls) = self.raster_calls.lock() {
            calls.push(request.scene_ids.clone());
        }
        if let Some(delay) = self.raster_delay {
            std::thread::sleep(delay);
        }
        if let Some(error) = self.injected_failure(&request.scene_ids) {
            return Err(error);
        }

        let (rows, cols) = (request.grid.rows, request.grid.cols);
        let n = request.scene_ids.len();
        let mut data = Array4::<f32>::zeros((n, rows, cols, request.bands.len()));
        let alpha_requested = request.bands.iter().any(|b| b == ALPHA_BAND);
        let mut valid = Array3::<bool>::from_elem((n, rows, cols), true);
        let mut any_mask = false;

        for (s, id) in request.scene_ids.iter().enumerate() {
            let raster = self.scene_raster(id)?;
            let (h, w, _) = raster.data.dim();
            if (h, w) != (rows, cols) {
                return Err(ServiceError::Rejected(format!(
                    "scene {id} is {w}x{h}, request grid is {cols}x{rows}"
                )));
            }

            for (b, band) in request.bands.iter().enumerate() {
                let mut out = data.index_axis_mut(Axis(0), s);
                let mut out = out.index_axis_mut(Axis(2), b);
                if let Some(src) = raster.bands.iter().position(|name| name == band) {
                    out.assign(&raster.data.index_axis(Axis(2), src));
                } else if band == ALPHA_BAND {
                    match &raster.valid {
                        Some(mask) => out.assign(&mask.mapv(|v| if v { 1.0 } else { 0.0 })),
                        None => out.fill(1.0),
                    }
                } else {
                    return Err(ServiceError::Rejected(format!(
                        "scene {id} has no band {band:?}"
                    )));
                }
            }

            if !alpha_requested {
                if let Some(mask) = &raster.valid {
                    valid.index_axis_mut(Axis(0), s).assign(mask);
                    any_mask = true;
                }
            }
        }

        Ok(RasterStack {
            data,
            valid: any_mask.then_some(valid),
        })
    }
}
