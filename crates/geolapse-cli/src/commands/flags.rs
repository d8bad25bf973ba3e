use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use geolapse_core::catalog::manifest::open_archive;
use geolapse_core::catalog::ManifestArchive;
use geolapse_core::pipeline::AnimationConfig;

/// Flags shared by `run` and `scenes`; each overrides the matching config value.
#[derive(Args, Debug)]
pub struct ConfigFlags {
    /// Pipeline config file (TOML); flags given on the command line override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Scene archive manifest (JSON) to search and rasterize from
    #[arg(long)]
    pub catalog: PathBuf,

    /// Tile center as LAT LON in degrees
    #[arg(long, num_args = 2, value_names = ["LAT", "LON"], allow_negative_numbers = true)]
    pub latlon: Option<Vec<f64>>,

    /// GeoJSON file defining the area (replaces --latlon)
    #[arg(long)]
    pub geojson: Option<PathBuf>,

    /// Ground resolution in metres per pixel
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Tile side in pixels
    #[arg(long)]
    pub tilesize: Option<usize>,

    /// Padding in pixels added to each tile side
    #[arg(long)]
    pub pad: Option<usize>,

    /// Product id(s)
    #[arg(long, num_args = 1..)]
    pub products: Option<Vec<String>>,

    /// Bands in display order; "alpha" becomes the validity mask
    #[arg(long, num_args = 1..)]
    pub bands: Option<Vec<String>>,

    /// MIN MAX per display band
    #[arg(long, num_args = 2.., allow_negative_numbers = true)]
    pub scales: Option<Vec<f64>>,

    /// Start of the time range (inclusive)
    #[arg(long)]
    pub start_datetime: Option<String>,

    /// End of the time range (exclusive)
    #[arg(long)]
    pub end_datetime: Option<String>,

    /// Maximum cloud fraction
    #[arg(long)]
    pub cloud_fraction: Option<f64>,

    /// Minimum fill fraction
    #[arg(long)]
    pub fill_fraction: Option<f64>,

    /// Minimum valid fraction
    #[arg(long)]
    pub valid_fraction: Option<f64>,

    /// Satellite id to keep
    #[arg(long)]
    pub sat_id: Option<String>,

    /// Solar azimuth range as MIN MAX degrees
    #[arg(long, num_args = 2)]
    pub solar_az_angle: Option<Vec<f64>>,

    /// Solar elevation range as MIN MAX degrees
    #[arg(long, num_args = 2)]
    pub solar_el_angle: Option<Vec<f64>>,

    /// Metadata field to sort scenes by
    #[arg(long)]
    pub sort_field: Option<String>,

    /// Sort order (asc | desc)
    #[arg(long)]
    pub sort_order: Option<String>,

    /// Merge scenes per (year | month | day | hour | minute | second)
    #[arg(long)]
    pub flatten: Option<String>,

    /// Processing level (toa | surface)
    #[arg(long)]
    pub processing_level: Option<String>,

    /// Output coordinate reference system (EPSG code or proj string)
    #[arg(long)]
    pub crs: Option<String>,

    /// Scenes per rasterization call (1-500)
    #[arg(long)]
    pub raster_len: Option<usize>,

    /// Seconds before a rasterization call is abandoned
    #[arg(long)]
    pub raster_timeout: Option<f64>,

    /// Buckets rasterized in parallel
    #[arg(long)]
    pub workers: Option<usize>,

    /// Discard frames whose valid pixel fraction is below this
    #[arg(long)]
    pub min_coverage: Option<f64>,
}

fn pair(values: &[f64], flag: &str) -> Result<[f64; 2]> {
    match values {
        [a, b] => Ok([*a, *b]),
        _ => bail!("--{flag} takes exactly two values, got {}", values.len()),
    }
}

impl ConfigFlags {
    /// The TOML config (or defaults) with every given flag applied on top.
    pub fn load(&self) -> Result<AnimationConfig> {
        let mut config = match &self.config {
            Some(path) => AnimationConfig::from_toml_file(path)
                .with_context(|| format!("Invalid pipeline config {}", path.display()))?,
            None => AnimationConfig::default(),
        };
        self.apply(&mut config)?;
        Ok(config)
    }

    fn apply(&self, config: &mut AnimationConfig) -> Result<()> {
        let area = &mut config.area;
        if let Some(latlon) = &self.latlon {
            area.latlon = Some(pair(latlon, "latlon")?);
            area.geojson = None;
        }
        if let Some(path) = &self.geojson {
            area.geojson = Some(path.clone());
        }
        if self.resolution.is_some() {
            area.resolution = self.resolution;
        }
        if self.tilesize.is_some() {
            area.tilesize = self.tilesize;
        }
        if self.pad.is_some() {
            area.pad = self.pad;
        }

        if let Some(products) = &self.products {
            config.products = products.clone();
        }
        if let Some(bands) = &self.bands {
            config.bands = bands.clone();
        }
        if let Some(scales) = &self.scales {
            if scales.len() % 2 != 0 {
                bail!("--scales takes MIN MAX pairs, got {} values", scales.len());
            }
            config.scales = Some(scales.chunks(2).map(|c| [c[0], c[1]]).collect());
            config.rescale = None;
        }
        if let Some(start) = &self.start_datetime {
            config.start_datetime = start.clone();
        }
        if let Some(end) = &self.end_datetime {
            config.end_datetime = end.clone();
        }

        let filters = &mut config.filters;
        if self.cloud_fraction.is_some() {
            filters.cloud_fraction = self.cloud_fraction;
        }
        if self.fill_fraction.is_some() {
            filters.fill_fraction = self.fill_fraction;
        }
        if self.valid_fraction.is_some() {
            filters.valid_fraction = self.valid_fraction;
        }
        if self.sat_id.is_some() {
            filters.sat_id = self.sat_id.clone();
        }
        if let Some(az) = &self.solar_az_angle {
            filters.solar_azimuth = Some(pair(az, "solar-az-angle")?);
        }
        if let Some(el) = &self.solar_el_angle {
            filters.solar_elevation = Some(pair(el, "solar-el-angle")?);
        }

        if let Some(field) = &self.sort_field {
            config.sort_field = field.parse()?;
        }
        if let Some(order) = &self.sort_order {
            config.sort_order = order.parse()?;
        }
        if let Some(flatten) = &self.flatten {
            config.flatten = match flatten.as_str() {
                "none" => None,
                other => Some(other.parse()?),
            };
        }
        if let Some(level) = &self.processing_level {
            config.processing_level = Some(level.parse()?);
        }
        if self.crs.is_some() {
            config.crs = self.crs.clone();
        }

        let raster = &mut config.raster;
        if let Some(len) = self.raster_len {
            raster.raster_len = len;
        }
        if let Some(timeout) = self.raster_timeout {
            raster.timeout_secs = timeout;
        }
        if let Some(workers) = self.workers {
            raster.workers = workers;
        }
        if self.min_coverage.is_some() {
            raster.min_coverage = self.min_coverage;
        }
        Ok(())
    }

    pub fn open_catalog(&self) -> Result<Arc<ManifestArchive>> {
        open_catalog(&self.catalog)
    }
}

pub fn open_catalog(path: &Path) -> Result<Arc<ManifestArchive>> {
    let archive = open_archive(path)
        .with_context(|| format!("Failed to open scene archive {}", path.display()))?;
    Ok(Arc::new(archive))
}
