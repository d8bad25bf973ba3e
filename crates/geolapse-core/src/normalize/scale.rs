use ndarray::{s, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{DISPLAY_CHANNEL_COUNT, EPSILON};
use crate::error::{GeolapseError, Result};
use crate::frame::{ensure_uniform_shape, Frame};

/// Linear map of one band from [min, max] to the display range [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandScale {
    pub min: f32,
    pub max: f32,
}

impl BandScale {
    pub const IDENTITY: BandScale = BandScale { min: 0.0, max: 1.0 };

    pub fn apply(&self, value: f32) -> f32 {
        let range = self.max - self.min;
        let range = if range.abs() < EPSILON { 1.0 } else { range };
        let v = ((value - self.min) / range).clamp(0.0, 1.0);
        if v.is_nan() {
            0.0
        } else {
            v
        }
    }
}

/// How display bounds are chosen. Exactly one mode is active per run.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScaleMode {
    /// User-supplied bounds, one pair per display band.
    Fixed(Vec<BandScale>),
    /// Bounds at these percentiles (0..=100) of every valid pixel in the stack.
    Percentile { low: f64, high: f64 },
    /// Raw values clipped to [0, 1].
    #[default]
    None,
}

impl ScaleMode {
    /// Pick the mode from the two mutually exclusive options.
    pub fn from_options(scales: Option<&[[f64; 2]]>, rescale: Option<[f64; 2]>) -> Result<Self> {
        match (scales, rescale) {
            (Some(_), Some(_)) => Err(GeolapseError::config(
                "fixed scales and percentile rescale are mutually exclusive",
            )),
            (Some(pairs), None) => Ok(Self::Fixed(
                pairs
                    .iter()
                    .map(|&[min, max]| BandScale {
                        min: min as f32,
                        max: max as f32,
                    })
                    .collect(),
            )),
            (None, Some([low, high])) => Ok(Self::Percentile { low, high }),
            (None, None) => Ok(Self::None),
        }
    }

    /// Check the mode against the number of display bands (the band list minus alpha).
    pub fn validate(&self, display_bands: usize) -> Result<()> {
        match self {
            Self::Fixed(scales) => {
                if scales.len() != display_bands {
                    return Err(GeolapseError::config(format!(
                        "{} scale pairs given for {} bands",
                        scales.len(),
                        display_bands
                    )));
                }
                if let Some(bad) = scales
                    .iter()
                    .find(|s| !(s.min.is_finite() && s.max.is_finite()))
                {
                    return Err(GeolapseError::config(format!(
                        "scale [{}, {}] is not finite",
                        bad.min, bad.max
                    )));
                }
            }
            Self::Percentile { low, high } => {
                let in_range = |p: &f64| (0.0..=100.0).contains(p);
                if !(in_range(low) && in_range(high) && low < high) {
                    return Err(GeolapseError::config(format!(
                        "rescale percentiles must satisfy 0 <= low < high <= 100, got {low} {high}"
                    )));
                }
            }
            Self::None => {}
        }
        Ok(())
    }
}

/// Per-band display bounds shared by every frame of the animation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleSpec {
    pub bands: Vec<BandScale>,
}

/// Value at percentile `p` (0..=100) of ascending `sorted`, interpolating
/// linearly between neighbouring order statistics.
pub fn percentile(sorted: &[f32], p: f64) -> Option<f32> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = (rank - lo as f64) as f32;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * t)
}

fn pooled_band(frames: &[Frame], band: usize) -> Vec<f32> {
    let mut values = Vec::new();
    for frame in frames {
        let view = frame.band(band);
        match &frame.mask {
            Some(mask) => Zip::from(&view).and(mask).for_each(|&v, &valid| {
                if valid && v.is_finite() {
                    values.push(v);
                }
            }),
            None => values.extend(view.iter().copied().filter(|v| v.is_finite())),
        }
    }
    values
}

/// Resolve a mode to concrete bounds for the first `bands` bands of `frames`.
///
/// Percentile bounds pool every valid pixel of every frame, so they are the same
/// whatever order the frames arrive in.
pub fn compute_scale_spec(frames: &[Frame], mode: &ScaleMode, bands: usize) -> Result<ScaleSpec> {
    let scales = match mode {
        ScaleMode::None => vec![BandScale::IDENTITY; bands],
        ScaleMode::Fixed(scales) => {
            if scales.len() < bands {
                return Err(GeolapseError::config(format!(
                    "{} scale pairs given for {} bands",
                    scales.len(),
                    bands
                )));
            }
            scales[..bands].to_vec()
        }
        ScaleMode::Percentile { low, high } => (0..bands)
            .into_par_iter()
            .map(|band| {
                let mut values = pooled_band(frames, band);
                values.sort_unstable_by(f32::total_cmp);
                match (percentile(&values, *low), percentile(&values, *high)) {
                    (Some(min), Some(max)) => {
                        debug!(band, min, max, samples = values.len(), "Percentile bounds");
                        BandScale { min, max }
                    }
                    _ => {
                        warn!(band, "No valid pixels to compute percentiles, using [0, 1]");
                        BandScale::IDENTITY
                    }
                }
            })
            .collect(),
    };
    Ok(ScaleSpec { bands: scales })
}

/// Scale every frame into [0, 1] with bounds computed once for the whole stack.
///
/// Frames with more than three bands keep only the first three. Masked pixels
/// are written as 0 after scaling.
pub fn normalize_frames(frames: Vec<Frame>, mode: &ScaleMode) -> Result<(Vec<Frame>, ScaleSpec)> {
    let (_, _, band_count) = ensure_uniform_shape(&frames)?;
    let bands = band_count.min(DISPLAY_CHANNEL_COUNT);
    if band_count > bands {
        info!(
            bands = band_count,
            kept = bands,
            "More than three display bands, animating the first three"
        );
    }

    let spec = compute_scale_spec(&frames, mode, bands)?;

    let normalized = frames
        .into_par_iter()
        .map(|frame| {
            let mut data = if band_count > bands {
                frame.data.slice(s![.., .., ..bands]).to_owned()
            } else {
                frame.data
            };
            for (b, scale) in spec.bands.iter().enumerate() {
                data.index_axis_mut(Axis(2), b)
                    .mapv_inplace(|v| scale.apply(v));
            }
            if let Some(mask) = &frame.mask {
                Zip::from(data.lanes_mut(Axis(2)))
                    .and(mask)
                    .for_each(|mut px, &valid| {
                        if !valid {
                            px.fill(0.0);
                        }
                    });
            }
            Frame { data, ..frame }
        })
        .collect();

    Ok((normalized, spec))
}
