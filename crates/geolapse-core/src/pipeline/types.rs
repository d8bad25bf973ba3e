use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::flatten::Bucket;
use crate::frame::RegistrationWarning;
use crate::geometry::BoundingBox;
use crate::normalize::ScaleSpec;
use crate::raster::DroppedBucket;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Querying,
    Selecting,
    Rasterizing,
    Registering,
    Normalizing,
    Encoding,
    Exporting,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Querying => write!(f, "Querying catalog"),
            Self::Selecting => write!(f, "Filtering and grouping scenes"),
            Self::Rasterizing => write!(f, "Rasterizing"),
            Self::Registering => write!(f, "Coregistering frames"),
            Self::Normalizing => write!(f, "Rescaling"),
            Self::Encoding => write!(f, "Encoding animation"),
            Self::Exporting => write!(f, "Writing exports"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage (e.g., bucket count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// What a completed run produced and what it had to leave out.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub output: PathBuf,
    pub bbox: BoundingBox,
    /// Buckets that became frames, in animation order.
    pub buckets: Vec<Bucket>,
    /// Buckets lost to rasterization failures.
    pub failed: Vec<DroppedBucket>,
    /// Buckets under the coverage threshold.
    pub filtered: Vec<DroppedBucket>,
    /// Frames coregistration left unshifted, by bucket key.
    pub warnings: Vec<(DateTime<Utc>, RegistrationWarning)>,
    pub scales: ScaleSpec,
    pub frame_count: usize,
    /// Extra files written after the animation.
    pub exports: Vec<PathBuf>,
    /// Exports that were requested but failed; the animation itself is intact.
    pub export_errors: Vec<String>,
}

impl RunSummary {
    pub fn scene_count(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }
}
