use ndarray::{s, Array2, Array3, Array4, Axis};

use crate::catalog::RasterStack;

/// Batch pixels with the alpha band already turned into validity.
#[derive(Clone, Debug)]
pub struct ScenePixels {
    /// shape = (scenes, rows, cols, bands), alpha removed
    pub data: Array4<f32>,
    /// shape = (scenes, rows, cols)
    pub valid: Option<Array3<bool>>,
}

impl ScenePixels {
    pub fn scene_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }
}

/// Remove the alpha band (if any) from a service stack and fold it into the
/// validity mask: a pixel is valid when alpha > 0 and the service marked it valid.
pub fn split_alpha(stack: RasterStack, alpha_index: Option<usize>) -> ScenePixels {
    let Some(alpha) = alpha_index else {
        return ScenePixels {
            data: stack.data,
            valid: stack.valid,
        };
    };

    let alpha_valid = stack.data.index_axis(Axis(3), alpha).mapv(|a| a > 0.0);
    let valid = match stack.valid {
        Some(service) => {
            let mut combined = service;
            combined.zip_mut_with(&alpha_valid, |v, &a| *v = *v && a);
            combined
        }
        None => alpha_valid,
    };

    let bands = stack.data.len_of(Axis(3));
    let keep: Vec<usize> = (0..bands).filter(|&b| b != alpha).collect();
    let data = stack.data.select(Axis(3), &keep);

    ScenePixels {
        data,
        valid: Some(valid),
    }
}

/// Reduce every scene of a bucket to one (pixels, mask) pair.
///
/// A lone scene passes through untouched. Otherwise each pixel is the mean over
/// the scenes valid at that pixel; pixels valid nowhere become 0 and masked.
pub fn mean_aggregate(parts: &[ScenePixels]) -> Option<(Array3<f32>, Option<Array2<bool>>)> {
    let total: usize = parts.iter().map(ScenePixels::scene_count).sum();
    let first = parts.iter().find(|p| p.scene_count() > 0)?;

    if total == 1 {
        let data = first.data.index_axis(Axis(0), 0).to_owned();
        let mask = first
            .valid
            .as_ref()
            .map(|v| v.index_axis(Axis(0), 0).to_owned());
        return Some((data, mask));
    }

    let (_, h, w, bands) = first.data.dim();
    let mut sum = Array3::<f64>::zeros((h, w, bands));
    let mut count = Array2::<u32>::zeros((h, w));
    let masked = parts.iter().any(|p| p.valid.is_some());

    for part in parts {
        for scene in 0..part.scene_count() {
            let pixels = part.data.slice(s![scene, .., .., ..]);
            let valid = part.valid.as_ref().map(|v| v.index_axis(Axis(0), scene));
            for row in 0..h {
                for col in 0..w {
                    if valid.as_ref().is_some_and(|v| !v[[row, col]]) {
                        continue;
                    }
                    count[[row, col]] += 1;
                    for band in 0..bands {
                        sum[[row, col, band]] += pixels[[row, col, band]] as f64;
                    }
                }
            }
        }
    }

    let mut data = Array3::<f32>::zeros((h, w, bands));
    for row in 0..h {
        for col in 0..w {
            let n = count[[row, col]];
            if n == 0 {
                continue;
            }
            for band in 0..bands {
                data[[row, col, band]] = (sum[[row, col, band]] / n as f64) as f32;
            }
        }
    }

    let mask = masked.then(|| count.mapv(|n| n > 0));
    Some((data, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(n: usize, value: f32) -> ScenePixels {
        ScenePixels {
            data: Array4::from_elem((n, 2, 2, 1), value),
            valid: None,
        }
    }

    #[test]
    fn lone_scene_passes_through() {
        let (data, mask) = mean_aggregate(&[constant(1, 0.25)]).unwrap();
        assert_eq!(data[[1, 1, 0]], 0.25);
        assert!(mask.is_none());
    }

    #[test]
    fn masked_pixels_do_not_contribute() {
        let mut valid = Array3::from_elem((2, 2, 2), true);
        valid[[1, 0, 0]] = false;
        valid[[0, 1, 1]] = false;
        valid[[1, 1, 1]] = false;
        let mut data = Array4::zeros((2, 2, 2, 1));
        data.slice_mut(s![0, .., .., ..]).fill(0.2);
        data.slice_mut(s![1, .., .., ..]).fill(0.6);
        let (mean, mask) = mean_aggregate(&[ScenePixels {
            data,
            valid: Some(valid),
        }])
        .unwrap();
        let mask = mask.unwrap();
        assert!((mean[[0, 1, 0]] - 0.4).abs() < 1e-6);
        assert!((mean[[0, 0, 0]] - 0.2).abs() < 1e-6);
        assert_eq!(mean[[1, 1, 0]], 0.0);
        assert!(!mask[[1, 1]]);
        assert!(mask[[0, 0]]);
    }

    #[test]
    fn alpha_band_becomes_mask() {
        let mut data = Array4::from_elem((1, 2, 2, 2), 0.5f32);
        data[[0, 0, 1, 1]] = 0.0;
        let pixels = split_alpha(RasterStack { data, valid: None }, Some(1));
        assert_eq!(pixels.data.dim(), (1, 2, 2, 1));
        let valid = pixels.valid.unwrap();
        assert!(!valid[[0, 0, 1]]);
        assert!(valid[[0, 1, 1]]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(mean_aggregate(&[]).is_none());
    }
}
