use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{s, Array2, Array3, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{
    LUMINANCE_B, LUMINANCE_G, LUMINANCE_R, MIN_REGISTRATION_COVERAGE, MIN_REGISTRATION_STDDEV,
    PARALLEL_FRAME_THRESHOLD,
};
use crate::error::{GeolapseError, Result};
use crate::frame::{ensure_uniform_shape, AlignmentOffset, Frame, RegistrationWarning};

use super::phase_correlation::{bilinear_sample, compute_offset};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoregisterConfig {
    /// Index of the frame every other frame is aligned to.
    #[serde(default)]
    pub reference_index: usize,
}

/// Single-channel stand-in used for correlation.
///
/// BT.601 luminance over the first three bands, or the band mean for fewer.
/// Masked pixels take the mean of the valid ones so mask edges do not correlate.
pub fn luminance_proxy(frame: &Frame) -> Array2<f32> {
    let bands = frame.band_count();
    let mut proxy = if bands >= 3 {
        let r = frame.band(0);
        let g = frame.band(1);
        let b = frame.band(2);
        let mut out = Array2::<f32>::zeros((frame.height(), frame.width()));
        Zip::from(&mut out)
            .and(&r)
            .and(&g)
            .and(&b)
            .for_each(|o, &r, &g, &b| *o = LUMINANCE_R * r + LUMINANCE_G * g + LUMINANCE_B * b);
        out
    } else if bands > 0 {
        frame.data.mean_axis(Axis(2)).unwrap_or_else(|| Array2::zeros((frame.height(), frame.width())))
    } else {
        Array2::zeros((frame.height(), frame.width()))
    };

    if let Some(mask) = &frame.mask {
        let (sum, count) = Zip::from(&proxy)
            .and(mask)
            .fold((0.0f64, 0usize), |(sum, count), &v, &valid| {
                if valid && v.is_finite() {
                    (sum + v as f64, count + 1)
                } else {
                    (sum, count)
                }
            });
        let fill = if count > 0 { (sum / count as f64) as f32 } else { 0.0 };
        Zip::from(&mut proxy).and(mask).for_each(|v, &valid| {
            if !valid {
                *v = fill;
            }
        });
    }
    proxy.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    proxy
}

/// Why a frame cannot take part in registration, if it can't.
fn degenerate_reason(frame: &Frame, proxy: &Array2<f32>) -> Option<String> {
    let coverage = frame.coverage();
    if coverage < MIN_REGISTRATION_COVERAGE {
        return Some(format!("only {:.1}% of pixels are valid", coverage * 100.0));
    }
    let n = proxy.len() as f64;
    let mean = proxy.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = proxy.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    if var.sqrt() < MIN_REGISTRATION_STDDEV {
        return Some("featureless image".to_string());
    }
    None
}

enum Registration {
    Shift(AlignmentOffset),
    Unaligned(RegistrationWarning),
}

fn register_one(reference: &Array2<f32>, frame: &Frame) -> Registration {
    let proxy = luminance_proxy(frame);
    if let Some(reason) = degenerate_reason(frame, &proxy) {
        return Registration::Unaligned(RegistrationWarning { reason });
    }

    let correlation = match compute_offset(reference, &proxy) {
        Ok(correlation) => correlation,
        Err(e) => {
            return Registration::Unaligned(RegistrationWarning {
                reason: format!("correlation failed: {e}"),
            })
        }
    };
    let offset = correlation.offset;
    let (h, w) = proxy.dim();
    if !(offset.dx.is_finite() && offset.dy.is_finite()) {
        return Registration::Unaligned(RegistrationWarning {
            reason: "offset is not finite".to_string(),
        });
    }
    if offset.dx.abs() > w as f64 / 2.0 || offset.dy.abs() > h as f64 / 2.0 {
        return Registration::Unaligned(RegistrationWarning {
            reason: format!(
                "offset ({:.2}, {:.2}) exceeds half the frame",
                offset.dx, offset.dy
            ),
        });
    }
    debug!(dx = offset.dx, dy = offset.dy, peak = correlation.peak, "Measured frame offset");
    Registration::Shift(offset)
}

/// Resample every band and the mask so content moves by (dx, dy).
pub fn shift_frame(frame: &Frame, offset: &AlignmentOffset) -> Frame {
    let (h, w, bands) = frame.shape();
    let mut data = Array3::<f32>::zeros((h, w, bands));
    for b in 0..bands {
        let src = frame.band(b).to_owned();
        let mut dst = data.index_axis_mut(Axis(2), b);
        for ((row, col), v) in dst.indexed_iter_mut() {
            *v = bilinear_sample(&src, row as f64 - offset.dy, col as f64 - offset.dx);
        }
    }

    let mask = frame.mask.as_ref().map(|mask| {
        let weights = mask.mapv(|v| if v { 1.0f32 } else { 0.0 });
        Array2::from_shape_fn((h, w), |(row, col)| {
            bilinear_sample(&weights, row as f64 - offset.dy, col as f64 - offset.dx) >= 0.5
        })
    });

    Frame {
        data,
        mask,
        key: frame.key,
        scene_ids: frame.scene_ids.clone(),
        offset: Some(offset.clone()),
        warning: None,
    }
}

/// Inclusive row/col window every shifted frame fully samples.
fn common_window(offsets: &[&AlignmentOffset], h: usize, w: usize) -> Option<(usize, usize, usize, usize)> {
    let mut top = 0i64;
    let mut bottom = h as i64 - 1;
    let mut left = 0i64;
    let mut right = w as i64 - 1;
    for o in offsets {
        top = top.max(o.dy.max(0.0).ceil() as i64);
        bottom = bottom.min((h as f64 - 1.0 + o.dy.min(0.0)).floor() as i64);
        left = left.max(o.dx.max(0.0).ceil() as i64);
        right = right.min((w as f64 - 1.0 + o.dx.min(0.0)).floor() as i64);
    }
    (top <= bottom && left <= right).then_some((
        top as usize,
        bottom as usize,
        left as usize,
        right as usize,
    ))
}

/// Common window of the shifted frames, leaving the frame with the largest
/// relative offset unaligned until one exists.
///
/// The reference never moves, so the loop ends with at least the full frame.
fn settle_window(
    registrations: &mut [Registration],
    reference_idx: usize,
    h: usize,
    w: usize,
) -> (usize, usize, usize, usize) {
    loop {
        let offsets: Vec<&AlignmentOffset> = registrations
            .iter()
            .filter_map(|r| match r {
                Registration::Shift(offset) => Some(offset),
                Registration::Unaligned(_) => None,
            })
            .collect();
        if let Some(window) = common_window(&offsets, h, w) {
            return window;
        }

        let worst = registrations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != reference_idx)
            .filter_map(|(i, r)| match r {
                Registration::Shift(o) => Some((i, o.clone())),
                Registration::Unaligned(_) => None,
            })
            .max_by(|(_, a), (_, b)| relative_extent(a, h, w).total_cmp(&relative_extent(b, h, w)));
        let Some((i, o)) = worst else {
            return (0, h - 1, 0, w - 1);
        };
        let reason = format!(
            "offset ({:.2}, {:.2}) leaves no overlap with the other frames",
            o.dx, o.dy
        );
        registrations[i] = Registration::Unaligned(RegistrationWarning { reason });
    }
}

fn relative_extent(o: &AlignmentOffset, h: usize, w: usize) -> f64 {
    (o.dx.abs() / w as f64).max(o.dy.abs() / h as f64)
}

fn crop(frame: &mut Frame, (top, bottom, left, right): (usize, usize, usize, usize)) {
    frame.data = frame
        .data
        .slice(s![top..=bottom, left..=right, ..])
        .to_owned();
    if let Some(mask) = frame.mask.take() {
        frame.mask = Some(mask.slice(s![top..=bottom, left..=right]).to_owned());
    }
}

/// Align every frame to the reference frame, then crop all to their common overlap.
///
/// Frames that cannot be registered are kept unshifted with a warning. The
/// output has the same length and order as the input.
pub fn coregister_frames<F>(
    frames: Vec<Frame>,
    config: &CoregisterConfig,
    on_frame_done: F,
) -> Result<Vec<Frame>>
where
    F: Fn(usize) + Send + Sync,
{
    let (h, w, _) = ensure_uniform_shape(&frames)?;
    let reference_idx = config.reference_index;
    if reference_idx >= frames.len() {
        return Err(GeolapseError::config(format!(
            "reference index {reference_idx} is out of range for {} frames",
            frames.len()
        )));
    }

    let reference_frame = &frames[reference_idx];
    let reference = luminance_proxy(reference_frame);
    let reference_problem = degenerate_reason(reference_frame, &reference);
    if let Some(reason) = &reference_problem {
        warn!(reference_idx, reason = %reason, "Reference frame cannot be registered against");
    }

    let counter = AtomicUsize::new(0);
    let measure = |(i, frame): (usize, &Frame)| -> Registration {
        let registration = if i == reference_idx {
            Registration::Shift(AlignmentOffset::default())
        } else if let Some(reason) = &reference_problem {
            Registration::Unaligned(RegistrationWarning {
                reason: format!("reference frame unusable ({reason})"),
            })
        } else {
            register_one(&reference, frame)
        };
        on_frame_done(counter.fetch_add(1, Ordering::Relaxed) + 1);
        registration
    };

    let mut registrations: Vec<Registration> = if frames.len() >= PARALLEL_FRAME_THRESHOLD {
        frames.par_iter().enumerate().map(measure).collect()
    } else {
        frames.iter().enumerate().map(measure).collect()
    };
    let window = settle_window(&mut registrations, reference_idx, h, w);

    let mut aligned: Vec<Frame> = frames
        .into_par_iter()
        .zip(registrations)
        .map(|(frame, registration)| match registration {
            Registration::Shift(offset) if offset.is_zero() => Frame {
                offset: Some(offset),
                ..frame
            },
            Registration::Shift(offset) => shift_frame(&frame, &offset),
            Registration::Unaligned(warning) => {
                warn!(key = %frame.key, warning = %warning, "Frame not registered");
                Frame {
                    warning: Some(warning),
                    ..frame
                }
            }
        })
        .collect();

    let (top, bottom, left, right) = window;
    if (top, left, bottom, right) != (0, 0, h - 1, w - 1) {
        for frame in &mut aligned {
            crop(frame, window);
        }
    }

    let unaligned = aligned.iter().filter(|f| f.warning.is_some()).count();
    info!(
        frames = aligned.len(),
        unaligned,
        rows = bottom - top + 1,
        cols = right - left + 1,
        "Coregistration complete"
    );
    Ok(aligned)
}
