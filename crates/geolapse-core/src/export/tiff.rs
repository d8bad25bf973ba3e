use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, Rgb};
use tracing::info;

use crate::error::{GeolapseError, Result};
use crate::frame::Frame;

fn to_u16(v: f32) -> u16 {
    if v.is_finite() {
        (v.clamp(0.0, 1.0) * 65535.0).round() as u16
    } else {
        0
    }
}

/// Save a display-range frame as 16-bit TIFF: grayscale for one band, RGB for three.
pub fn save_frame_tiff(frame: &Frame, path: &Path) -> Result<()> {
    let (h, w, bands) = frame.shape();
    let (w32, h32) = (w as u32, h as u32);
    let mismatch = || GeolapseError::Export(format!("pixel buffer does not fit {w}x{h}"));

    match bands {
        1 => {
            let pixels: Vec<u16> = frame.band(0).iter().map(|&v| to_u16(v)).collect();
            let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w32, h32, pixels)
                .ok_or_else(mismatch)?;
            img.save_with_format(path, image::ImageFormat::Tiff)?;
        }
        3 => {
            // Logical iteration order is row, col, band: interleaved RGB.
            let pixels: Vec<u16> = frame.data.iter().map(|&v| to_u16(v)).collect();
            let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w32, h32, pixels)
                .ok_or_else(mismatch)?;
            img.save_with_format(path, image::ImageFormat::Tiff)?;
        }
        n => {
            return Err(GeolapseError::Export(format!(
                "cannot write a {n}-band frame as TIFF"
            )))
        }
    }
    Ok(())
}

fn file_stem_for(frame: &Frame) -> String {
    let name = frame
        .scene_ids
        .last()
        .cloned()
        .unwrap_or_else(|| frame.key.format("%Y%m%dT%H%M%S").to_string());
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// One TIFF per frame in `dir`, named after the frame's last scene id.
pub fn export_frame_tiffs(frames: &[Frame], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(frames.len());
    for frame in frames {
        let path = dir.join(format!("{}.tif", file_stem_for(frame)));
        save_frame_tiff(frame, &path)?;
        written.push(path);
    }
    info!(files = written.len(), dir = %dir.display(), "Exported frames");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;

    #[test]
    fn names_are_filesystem_safe() {
        let frame = Frame::new(
            Array3::zeros((1, 1, 1)),
            None,
            Utc.with_ymd_and_hms(2019, 2, 3, 4, 5, 6).unwrap(),
        );
        assert_eq!(file_stem_for(&frame), "20190203T040506");
        let frame = frame.with_scene_ids(vec!["a".into(), "landsat:LC08:01:RT:TOAR:x/y".into()]);
        assert_eq!(file_stem_for(&frame), "landsat_LC08_01_RT_TOAR_x_y");
    }
}
