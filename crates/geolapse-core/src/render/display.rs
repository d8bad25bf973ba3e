use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::frame::Frame;

fn to_byte(v: f32) -> u8 {
    if v.is_finite() {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        0
    }
}

/// Render a display-range frame to 8-bit RGBA.
///
/// One band renders as gray; otherwise the first three bands are R, G, B.
/// Masked pixels are fully transparent black.
pub fn to_rgba(frame: &Frame) -> RgbaImage {
    let (h, w, bands) = frame.shape();
    let mut img = RgbaImage::new(w as u32, h as u32);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let (row, col) = (y as usize, x as usize);
        if bands == 0 || !frame.is_valid(row, col) {
            *px = Rgba([0, 0, 0, 0]);
            continue;
        }
        let channel = |b: usize| to_byte(frame.data[[row, col, b.min(bands - 1)]]);
        *px = if bands == 1 {
            let v = channel(0);
            Rgba([v, v, v, 255])
        } else {
            Rgba([channel(0), channel(1), channel(2), 255])
        };
    }
    img
}

/// Center crop to `width:height`, trimming whichever axis is too long.
pub fn crop_to_aspect(img: &RgbaImage, [ratio_w, ratio_h]: [f64; 2]) -> RgbaImage {
    let (w, h) = img.dimensions();
    let target = ratio_w / ratio_h;
    let current = w as f64 / h as f64;
    if !(target.is_finite() && target > 0.0) || (current - target).abs() < 1e-9 {
        return img.clone();
    }

    let (new_w, new_h) = if current > target {
        (((h as f64 * target).round() as u32).clamp(1, w), h)
    } else {
        (w, ((w as f64 / target).round() as u32).clamp(1, h))
    };
    let x = (w - new_w) / 2;
    let y = (h - new_h) / 2;
    imageops::crop_imm(img, x, y, new_w, new_h).to_image()
}

pub fn resize_to(img: &RgbaImage, (width, height): (u32, u32)) -> RgbaImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Lanczos3)
}

/// Render, crop and resize every frame, preserving order.
pub fn render_frames(
    frames: &[Frame],
    aspect_ratio: Option<[f64; 2]>,
    outsize: Option<(u32, u32)>,
) -> Vec<RgbaImage> {
    let render = |frame: &Frame| {
        let mut img = to_rgba(frame);
        if let Some(ratio) = aspect_ratio {
            img = crop_to_aspect(&img, ratio);
        }
        if let Some(size) = outsize {
            img = resize_to(&img, size);
        }
        img
    };
    if frames.len() >= PARALLEL_FRAME_THRESHOLD {
        frames.par_iter().map(render).collect()
    } else {
        frames.iter().map(render).collect()
    }
}
