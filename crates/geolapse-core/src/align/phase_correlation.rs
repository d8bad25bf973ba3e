use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{GeolapseError, Result};
use crate::frame::AlignmentOffset;

/// Offset found by phase correlation together with the height of its peak.
#[derive(Clone, Debug)]
pub struct Correlation {
    /// Shift to apply to the target so it lines up with the reference.
    pub offset: AlignmentOffset,
    /// Correlation surface maximum, in (0, 1] for well-posed inputs.
    pub peak: f64,
}

/// Translation between two equally sized images by FFT phase correlation.
pub fn compute_offset(reference: &Array2<f32>, target: &Array2<f32>) -> Result<Correlation> {
    let (h, w) = reference.dim();
    if target.dim() != (h, w) {
        let (th, tw) = target.dim();
        return Err(GeolapseError::config(format!(
            "cannot correlate {w}x{h} with {tw}x{th}"
        )));
    }
    if h < 2 || w < 2 {
        return Err(GeolapseError::config(format!(
            "{w}x{h} is too small to correlate"
        )));
    }

    let mut ref_spec = windowed_spectrum(reference);
    let tgt_spec = windowed_spectrum(target);

    // Normalized cross-power spectrum, in place over the reference spectrum
    ref_spec.zip_mut_with(&tgt_spec, |r, t| {
        let cross = *r * t.conj();
        let mag = cross.norm();
        *r = if mag > 1e-12 {
            cross / mag
        } else {
            Complex::new(0.0, 0.0)
        };
    });

    fft2d(&mut ref_spec, true);
    let scale = 1.0 / (h * w) as f64;
    let surface = ref_spec.mapv(|c| c.re * scale);

    let (peak_row, peak_col, peak) = find_peak(&surface);
    let wrap = |idx: usize, n: usize| {
        if idx > n / 2 {
            idx as f64 - n as f64
        } else {
            idx as f64
        }
    };
    let (sub_dy, sub_dx) = refine_peak(&surface, peak_row, peak_col);

    Ok(Correlation {
        offset: AlignmentOffset {
            dx: wrap(peak_col, w) + sub_dx,
            dy: wrap(peak_row, h) + sub_dy,
        },
        peak,
    })
}

/// Hann-windowed forward spectrum.
fn windowed_spectrum(data: &Array2<f32>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let hann = |i: usize, n: usize| 0.5 * (1.0 - (std::f64::consts::TAU * i as f64 / n as f64).cos());
    let mut spec = Array2::from_shape_fn((h, w), |(row, col)| {
        Complex::new(data[[row, col]] as f64 * hann(row, h) * hann(col, w), 0.0)
    });
    fft2d(&mut spec, false);
    spec
}

/// Separable 2D FFT: every row, then every column. Unnormalized in both directions.
fn fft2d(data: &mut Array2<Complex<f64>>, inverse: bool) {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(w), planner.plan_fft_inverse(h))
    } else {
        (planner.plan_fft_forward(w), planner.plan_fft_forward(h))
    };

    let mut lane_buf: Vec<Complex<f64>> = Vec::with_capacity(h.max(w));
    for mut row in data.rows_mut() {
        lane_buf.clear();
        lane_buf.extend(row.iter().copied());
        row_fft.process(&mut lane_buf);
        row.iter_mut().zip(&lane_buf).for_each(|(dst, src)| *dst = *src);
    }
    for mut col in data.columns_mut() {
        lane_buf.clear();
        lane_buf.extend(col.iter().copied());
        col_fft.process(&mut lane_buf);
        col.iter_mut().zip(&lane_buf).for_each(|(dst, src)| *dst = *src);
    }
}

fn find_peak(surface: &Array2<f64>) -> (usize, usize, f64) {
    surface
        .indexed_iter()
        .fold((0, 0, f64::NEG_INFINITY), |best, ((row, col), &v)| {
            if v > best.2 {
                (row, col, v)
            } else {
                best
            }
        })
}

/// Parabola fit through the 3x3 neighbourhood of the peak, per axis.
///
/// Returns (d_row, d_col) clamped to half a pixel; peaks on the border are not refined.
fn refine_peak(surface: &Array2<f64>, row: usize, col: usize) -> (f64, f64) {
    let (h, w) = surface.dim();
    if row == 0 || row + 1 >= h || col == 0 || col + 1 >= w {
        return (0.0, 0.0);
    }
    let vertex = |prev: f64, curr: f64, next: f64| {
        let denom = prev - 2.0 * curr + next;
        if denom.abs() > 1e-12 {
            ((prev - next) / (2.0 * denom)).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    };
    let centre = surface[[row, col]];
    (
        vertex(surface[[row - 1, col]], centre, surface[[row + 1, col]]),
        vertex(surface[[row, col - 1]], centre, surface[[row, col + 1]]),
    )
}

/// Bilinear interpolation at fractional (y, x); samples outside the image read as 0.
pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    let top = sample(y0, x0) * (1.0 - fx) + sample(y0, x0 + 1) * fx;
    let bottom = sample(y0 + 1, x0) * (1.0 - fx) + sample(y0 + 1, x0 + 1) * fx;
    if fy == 0.0 {
        top
    } else {
        top * (1.0 - fy) + bottom * fy
    }
}
