#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use image::RgbaImage;
use ndarray::{Array2, Array3};

use geolapse_core::catalog::memory::SceneRaster;
use geolapse_core::catalog::InMemoryCatalog;
use geolapse_core::frame::Frame;
use geolapse_core::pipeline::{AnimationConfig, AreaConfig, Services};
use geolapse_core::render::{AnimationEncoder, BackendError, OutputFormat};
use geolapse_core::scene::SceneDescriptor;

pub const PRODUCT: &str = "landsat:LC08:01:RT:TOAR";

pub fn ts(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

pub fn scene(id: &str, acquired: DateTime<Utc>) -> SceneDescriptor {
    SceneDescriptor::new(id, acquired, PRODUCT)
}

pub fn scene_with_cloud(id: &str, acquired: DateTime<Utc>, cloud: Option<f64>) -> SceneDescriptor {
    SceneDescriptor {
        cloud_fraction: cloud,
        ..scene(id, acquired)
    }
}

/// RGB raster where every pixel holds `rgb`.
pub fn constant_raster(rows: usize, cols: usize, rgb: [f32; 3]) -> SceneRaster {
    SceneRaster {
        bands: vec!["red".into(), "green".into(), "blue".into()],
        data: Array3::from_shape_fn((rows, cols, 3), |(_, _, b)| rgb[b]),
        valid: None,
    }
}

/// RGB raster whose values vary by pixel and by `seed`.
pub fn gradient_raster(rows: usize, cols: usize, seed: f32) -> SceneRaster {
    SceneRaster {
        bands: vec!["red".into(), "green".into(), "blue".into()],
        data: Array3::from_shape_fn((rows, cols, 3), |(r, c, b)| {
            seed + (r * cols + c) as f32 / (rows * cols) as f32 + b as f32 * 0.1
        }),
        valid: None,
    }
}

pub fn with_mask(mut raster: SceneRaster, mask: Array2<bool>) -> SceneRaster {
    raster.valid = Some(mask);
    raster
}

/// Frame of `bands` bands filled by `f(row, col, band)`.
pub fn frame_from_fn(
    rows: usize,
    cols: usize,
    bands: usize,
    key: DateTime<Utc>,
    f: impl Fn(usize, usize, usize) -> f32,
) -> Frame {
    Frame::new(
        Array3::from_shape_fn((rows, cols, bands), |(r, c, b)| f(r, c, b)),
        None,
        key,
    )
}

/// Deterministic pseudo-random texture in [0, 1).
pub fn texture(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array2::from_shape_fn((rows, cols), |_| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 40) as f32) / (1u64 << 24) as f32
    })
}

/// Point-area config on a `tilesize` square grid writing `<dir>/out.gif`.
pub fn point_config(dir: &Path, tilesize: usize) -> AnimationConfig {
    AnimationConfig {
        output: PathBuf::from("out.gif"),
        outdir: Some(dir.to_path_buf()),
        area: AreaConfig {
            resolution: Some(30.0),
            tilesize: Some(tilesize),
            pad: Some(0),
            ..AreaConfig::default()
        },
        ..AnimationConfig::default()
    }
}

/// Encoder that keeps the frames it was handed and writes a stub file.
#[derive(Default)]
pub struct RecordingEncoder {
    pub calls: Mutex<Vec<(usize, (u32, u32), u32)>>,
    pub frames: Mutex<Vec<RgbaImage>>,
}

impl RecordingEncoder {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl AnimationEncoder for RecordingEncoder {
    fn name(&self) -> &str {
        "recording"
    }

    fn encode(
        &self,
        frames: &[RgbaImage],
        fps: u32,
        _format: OutputFormat,
        path: &Path,
    ) -> Result<(), BackendError> {
        let size = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        self.calls.lock().unwrap().push((frames.len(), size, fps));
        *self.frames.lock().unwrap() = frames.to_vec();
        std::fs::write(path, b"animation")?;
        Ok(())
    }
}

/// Encoder that writes partial output and then fails.
pub struct FailingEncoder;

impl AnimationEncoder for FailingEncoder {
    fn name(&self) -> &str {
        "failing"
    }

    fn encode(
        &self,
        _frames: &[RgbaImage],
        _fps: u32,
        _format: OutputFormat,
        path: &Path,
    ) -> Result<(), BackendError> {
        std::fs::write(path, b"partial")?;
        Err(BackendError("encoder crashed".into()))
    }
}

pub fn services(
    catalog: InMemoryCatalog,
    encoder: Arc<dyn AnimationEncoder>,
) -> (Arc<InMemoryCatalog>, Services) {
    let catalog = Arc::new(catalog);
    let services = Services::new(catalog.clone(), catalog.clone(), encoder);
    (catalog, services)
}

/// Every file under `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default();
    files.sort();
    files
}
