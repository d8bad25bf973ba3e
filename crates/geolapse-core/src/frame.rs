use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::error::{GeolapseError, Result};

/// One animation frame: the raster produced for a single bucket.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, shape = (rows, cols, bands)
    pub data: Array3<f32>,
    /// Per-pixel validity, shape = (rows, cols). `None` means every pixel is valid.
    pub mask: Option<Array2<bool>>,
    /// Flatten key of the bucket this frame was rasterized from.
    pub key: DateTime<Utc>,
    /// Ids of the scenes aggregated into this frame, in bucket order.
    pub scene_ids: Vec<String>,
    /// Offset applied during coregistration, if it ran.
    pub offset: Option<AlignmentOffset>,
    /// Set when coregistration could not align this frame.
    pub warning: Option<RegistrationWarning>,
}

impl Frame {
    pub fn new(data: Array3<f32>, mask: Option<Array2<bool>>, key: DateTime<Utc>) -> Self {
        Self {
            data,
            mask,
            key,
            scene_ids: Vec::new(),
            offset: None,
            warning: None,
        }
    }

    pub fn with_scene_ids(mut self, ids: Vec<String>) -> Self {
        self.scene_ids = ids;
        self
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// (rows, cols, bands)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(2), index)
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask.as_ref().is_none_or(|m| m[[row, col]])
    }

    /// Fraction of pixels that are valid, in [0, 1].
    pub fn coverage(&self) -> f64 {
        match &self.mask {
            None => 1.0,
            Some(mask) if mask.is_empty() => 0.0,
            Some(mask) => mask.iter().filter(|&&v| v).count() as f64 / mask.len() as f64,
        }
    }
}

/// Translation measured between a frame and the registration reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlignmentOffset {
    pub dx: f64,
    pub dy: f64,
}

impl AlignmentOffset {
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Non-fatal note attached to a frame that coregistration left unshifted.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationWarning {
    pub reason: String,
}

impl std::fmt::Display for RegistrationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "left unaligned: {}", self.reason)
    }
}

/// Check that every frame has the same rows, cols and band count.
///
/// A mismatch means the rasterization grid or band list was inconsistent across
/// buckets, which is reported as a configuration error.
pub fn ensure_uniform_shape(frames: &[Frame]) -> Result<(usize, usize, usize)> {
    let first = frames.first().ok_or(GeolapseError::EmptySequence)?;
    let expected = first.shape();
    for frame in frames {
        if frame.shape() != expected {
            let (h, w, b) = frame.shape();
            return Err(GeolapseError::config(format!(
                "frame {} is {}x{}x{}, expected {}x{}x{} like frame {}",
                frame.key, h, w, b, expected.0, expected.1, expected.2, first.key
            )));
        }
        if let Some(mask) = &frame.mask {
            if mask.dim() != (expected.0, expected.1) {
                return Err(GeolapseError::config(format!(
                    "mask of frame {} does not match its pixel grid",
                    frame.key
                )));
            }
        }
    }
    Ok(expected)
}
