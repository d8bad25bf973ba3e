use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::catalog::{RasterRequest, RasterService, RasterStack, ServiceError};
use crate::consts::{CANCEL_POLL_MS, RASTER_ATTEMPTS};
use crate::error::{GeolapseError, Result};

/// Where a batch sits, for error reporting.
#[derive(Clone, Debug)]
pub struct BatchLabel {
    pub bucket: String,
    pub batch: usize,
}

/// Issue one rasterization call on a helper thread and give up after `timeout`,
/// or as soon as `cancel` fires.
///
/// A call that is abandoned keeps running detached; its result is discarded.
pub fn call_with_timeout(
    service: &Arc<dyn RasterService>,
    request: RasterRequest,
    timeout: Duration,
    cancel: &CancelToken,
) -> std::result::Result<RasterStack, ServiceError> {
    let (tx, rx) = mpsc::channel();
    let service = Arc::clone(service);
    std::thread::Builder::new()
        .name("raster-call".into())
        .spawn(move || {
            let _ = tx.send(service.raster(&request));
        })
        .map_err(|e| ServiceError::Unavailable(format!("failed to start raster call: {e}")))?;

    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(CANCEL_POLL_MS);
    loop {
        if cancel.is_cancelled() {
            return Err(ServiceError::Unavailable("raster call abandoned on cancel".into()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ServiceError::TimedOut(timeout));
        }
        match rx.recv_timeout(remaining.min(poll)) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ServiceError::Unavailable(
                    "raster call ended without a result".into(),
                ))
            }
        }
    }
}

/// Rasterize one batch, retrying transient failures up to [`RASTER_ATTEMPTS`] times.
pub fn fetch_batch(
    service: &Arc<dyn RasterService>,
    request: &RasterRequest,
    label: &BatchLabel,
    timeout: Duration,
    backoff: Duration,
    cancel: &CancelToken,
) -> Result<RasterStack> {
    let mut attempt = 0;
    loop {
        cancel.check()?;
        attempt += 1;

        let result = call_with_timeout(service, request.clone(), timeout, cancel);
        cancel.check()?;
        match result {
            Ok(stack) => {
                debug!(
                    bucket = %label.bucket,
                    batch = label.batch,
                    scenes = request.scene_ids.len(),
                    attempt,
                    "Rasterized batch"
                );
                return Ok(stack);
            }
            Err(e) if e.is_transient() && attempt < RASTER_ATTEMPTS => {
                warn!(
                    bucket = %label.bucket,
                    batch = label.batch,
                    attempt,
                    error = %e,
                    "Raster call failed, retrying"
                );
                std::thread::sleep(backoff * attempt as u32);
            }
            Err(e) => {
                return Err(GeolapseError::Raster {
                    bucket: label.bucket.clone(),
                    batch: label.batch,
                    scene_ids: request.scene_ids.clone(),
                    message: format!("{e} (after {attempt} attempt(s))"),
                });
            }
        }
    }
}
