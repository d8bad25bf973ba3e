//! Turns buckets of scene descriptors into frames.

pub mod aggregate;
pub mod batch;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Axis;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{ProcessingLevel, RasterRequest, RasterService, RasterStack};
use crate::consts::{
    ALPHA_BAND, DEFAULT_RASTER_LEN, DEFAULT_REMOTE_TIMEOUT_SECS, MAX_RASTER_LEN,
    PARALLEL_BUCKET_THRESHOLD, RASTER_RETRY_BACKOFF_MS,
};
use crate::error::{GeolapseError, Result};
use crate::flatten::Bucket;
use crate::frame::Frame;
use crate::geometry::ResolvedGeometry;

use aggregate::{mean_aggregate, split_alpha};
use batch::{fetch_batch, BatchLabel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Scenes per rasterization call, in [1, 500].
    pub raster_len: usize,
    /// Seconds before a single remote call is abandoned.
    pub timeout_secs: f64,
    /// Base pause between retries, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
    /// Buckets rasterized concurrently.
    pub workers: usize,
    /// Discard frames whose valid-pixel fraction is below this.
    pub min_coverage: Option<f64>,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            raster_len: DEFAULT_RASTER_LEN,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS as f64,
            retry_backoff_ms: RASTER_RETRY_BACKOFF_MS,
            workers: 1,
            min_coverage: None,
        }
    }
}

impl RasterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RASTER_LEN).contains(&self.raster_len) {
            return Err(GeolapseError::config(format!(
                "scenes per raster call must be between 1 and {MAX_RASTER_LEN}, got {}",
                self.raster_len
            )));
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(GeolapseError::config(format!(
                "raster timeout {}s must be positive",
                self.timeout_secs
            )));
        }
        if self.workers == 0 {
            return Err(GeolapseError::config("raster workers must be > 0"));
        }
        if let Some(c) = self.min_coverage {
            if !(0.0..=1.0).contains(&c) {
                return Err(GeolapseError::config(format!("coverage {c} is invalid")));
            }
        }
        Ok(())
    }
}

/// What every rasterization call shares.
#[derive(Clone, Debug)]
pub struct RasterJob {
    pub grid: ResolvedGeometry,
    /// Requested bands, possibly including `alpha`.
    pub bands: Vec<String>,
    pub crs: Option<String>,
    pub processing_level: Option<ProcessingLevel>,
    pub config: RasterConfig,
}

impl RasterJob {
    fn alpha_index(&self) -> Option<usize> {
        self.bands.iter().position(|b| b == ALPHA_BAND)
    }

    fn display_band_count(&self) -> usize {
        self.bands.len() - usize::from(self.alpha_index().is_some())
    }
}

/// A bucket that produced no frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DroppedBucket {
    pub key: String,
    pub scene_ids: Vec<String>,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct RasterOutcome {
    /// Frames in bucket order.
    pub frames: Vec<Frame>,
    /// Buckets lost to persistent raster failures.
    pub failed: Vec<DroppedBucket>,
    /// Buckets discarded by the coverage threshold.
    pub filtered: Vec<DroppedBucket>,
}

enum BucketResult {
    Frame(Frame),
    Filtered(DroppedBucket),
}

/// Rasterize every bucket into one frame.
///
/// A bucket whose batches keep failing is dropped and reported in
/// [`RasterOutcome::failed`]; the run only fails when no frame survives.
/// Buckets run on a bounded rayon pool when `workers > 1`, and frames are
/// always returned in bucket order.
pub fn rasterize_buckets<F>(
    buckets: &[Bucket],
    service: &Arc<dyn RasterService>,
    job: &RasterJob,
    cancel: &CancelToken,
    on_bucket_done: F,
) -> Result<RasterOutcome>
where
    F: Fn(usize) + Send + Sync,
{
    if buckets.is_empty() {
        return Err(GeolapseError::EmptySequence);
    }

    let counter = AtomicUsize::new(0);
    let run_one = |bucket: &Bucket| {
        let result = rasterize_bucket(bucket, service, job, cancel);
        on_bucket_done(counter.fetch_add(1, Ordering::Relaxed) + 1);
        result
    };

    let results: Vec<Result<BucketResult>> =
        if job.config.workers > 1 && buckets.len() >= PARALLEL_BUCKET_THRESHOLD {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(job.config.workers)
                .thread_name(|i| format!("raster-worker-{i}"))
                .build()
                .map_err(|e| GeolapseError::config(format!("cannot start raster workers: {e}")))?;
            pool.install(|| buckets.par_iter().map(run_one).collect())
        } else {
            buckets.iter().map(run_one).collect()
        };

    let mut outcome = RasterOutcome::default();
    for (bucket, result) in buckets.iter().zip(results) {
        match result {
            Ok(BucketResult::Frame(frame)) => outcome.frames.push(frame),
            Ok(BucketResult::Filtered(dropped)) => outcome.filtered.push(dropped),
            Err(GeolapseError::Cancelled) => return Err(GeolapseError::Cancelled),
            Err(e) => {
                warn!(bucket = %bucket.label(), error = %e, "Dropping bucket");
                outcome.failed.push(DroppedBucket {
                    key: bucket.label(),
                    scene_ids: bucket.scene_ids(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        frames = outcome.frames.len(),
        failed = outcome.failed.len(),
        filtered = outcome.filtered.len(),
        "Rasterization complete"
    );

    if outcome.frames.is_empty() {
        return Err(if outcome.failed.is_empty() {
            GeolapseError::EmptySequence
        } else {
            GeolapseError::AllBucketsFailed {
                dropped: outcome.failed.len(),
            }
        });
    }
    Ok(outcome)
}

fn rasterize_bucket(
    bucket: &Bucket,
    service: &Arc<dyn RasterService>,
    job: &RasterJob,
    cancel: &CancelToken,
) -> Result<BucketResult> {
    let label = bucket.label();
    let timeout = Duration::from_secs_f64(job.config.timeout_secs);
    let backoff = Duration::from_millis(job.config.retry_backoff_ms);
    let alpha = job.alpha_index();

    let mut parts = Vec::new();
    for (index, chunk) in bucket.scenes.chunks(job.config.raster_len).enumerate() {
        let request = RasterRequest {
            scene_ids: chunk.iter().map(|s| s.id.clone()).collect(),
            grid: job.grid.clone(),
            bands: job.bands.clone(),
            crs: job.crs.clone(),
            processing_level: job.processing_level,
        };
        let batch_label = BatchLabel {
            bucket: label.clone(),
            batch: index,
        };
        let stack = fetch_batch(service, &request, &batch_label, timeout, backoff, cancel)?;
        check_stack(&stack, &request, &batch_label)?;
        parts.push(split_alpha(stack, alpha));
    }

    let (data, mask) = mean_aggregate(&parts).ok_or(GeolapseError::EmptySequence)?;
    debug_assert_eq!(data.len_of(Axis(2)), job.display_band_count());
    let frame = Frame::new(data, mask, bucket.key).with_scene_ids(bucket.scene_ids());

    if let Some(min) = job.config.min_coverage {
        let coverage = frame.coverage();
        if coverage < min {
            info!(bucket = %label, coverage, min, "Frame below coverage threshold");
            return Ok(BucketResult::Filtered(DroppedBucket {
                key: label,
                scene_ids: bucket.scene_ids(),
                reason: format!("valid pixel fraction {coverage:.3} below {min}"),
            }));
        }
    }
    Ok(BucketResult::Frame(frame))
}

/// Reject service responses that do not match what was asked for.
fn check_stack(stack: &RasterStack, request: &RasterRequest, label: &BatchLabel) -> Result<()> {
    let expected = (
        request.scene_ids.len(),
        request.grid.rows,
        request.grid.cols,
        request.bands.len(),
    );
    let valid_ok = stack
        .valid
        .as_ref()
        .is_none_or(|v| v.dim() == (expected.0, expected.1, expected.2));
    if stack.data.dim() != expected || !valid_ok {
        let (n, h, w, b) = stack.data.dim();
        return Err(GeolapseError::Raster {
            bucket: label.bucket.clone(),
            batch: label.batch,
            scene_ids: request.scene_ids.clone(),
            message: format!(
                "service returned {n}x{h}x{w}x{b}, expected {}x{}x{}x{}",
                expected.0, expected.1, expected.2, expected.3
            ),
        });
    }
    Ok(())
}
