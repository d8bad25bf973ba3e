use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeolapseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Catalog query failed: {0}")]
    Catalog(String),

    #[error("Rasterization failed for bucket {bucket}, batch {batch} ({} scenes): {message}", .scene_ids.len())]
    Raster {
        bucket: String,
        batch: usize,
        scene_ids: Vec<String>,
        message: String,
    },

    #[error("All {dropped} buckets failed to rasterize; nothing to animate")]
    AllBucketsFailed { dropped: usize },

    #[error("Encoding {frames} frames to {} with {backend} failed: {message}", .path.display())]
    Encode {
        path: PathBuf,
        frames: usize,
        backend: String,
        message: String,
    },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GeolapseError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// True for the error classes that abort a run before any imagery work.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Catalog(_))
    }
}

pub type Result<T> = std::result::Result<T, GeolapseError>;
