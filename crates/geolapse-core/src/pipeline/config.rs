use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::align::CoregisterConfig;
use crate::catalog::{CatalogQuery, ProcessingLevel};
use crate::consts::{ALPHA_BAND, DISPLAY_CHANNEL_COUNT};
use crate::error::{GeolapseError, Result};
use crate::flatten::FlattenGranularity;
use crate::geometry::{Geometry, PolygonGrid, ResolvedGeometry};
use crate::normalize::{Colormap, ScaleMode};
use crate::raster::{RasterConfig, RasterJob};
use crate::render::{AssembleOptions, EncoderBackend, OutputFormat};
use crate::scene::{parse_instant, SortField, SortOrder, TimeRange};
use crate::selection::SceneFilter;

/// Area of interest. Exactly one of `latlon` and `geojson` is used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Tile center as [lat, lon] in degrees.
    pub latlon: Option<[f64; 2]>,
    /// GeoJSON file with a Polygon/MultiPolygon (or a Feature/FeatureCollection of one).
    pub geojson: Option<PathBuf>,
    /// Metres per pixel.
    pub resolution: Option<f64>,
    /// Tile side in pixels, excluding padding.
    pub tilesize: Option<usize>,
    /// Padding added to each side of the tile, in pixels.
    pub pad: Option<usize>,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            latlon: Some([35.687, -105.9378]),
            geojson: None,
            resolution: None,
            tilesize: None,
            pad: None,
        }
    }
}

impl AreaConfig {
    /// Pick the single geometry source. A GeoJSON file wins over the point.
    pub fn geometry(&self) -> Result<Geometry> {
        if let Some(path) = &self.geojson {
            let grid = match (self.resolution, self.tilesize, self.pad) {
                (Some(res), None, None) => PolygonGrid::Resolution(res),
                (None, Some(tilesize), Some(pad)) => PolygonGrid::Shape { tilesize, pad },
                (None, Some(tilesize), None) => PolygonGrid::Shape { tilesize, pad: 0 },
                _ => {
                    return Err(GeolapseError::config(
                        "a GeoJSON area needs either a resolution or a tilesize and pad, not both",
                    ))
                }
            };
            return Geometry::from_geojson_file(path, grid).map_err(|e| match e {
                GeolapseError::Io(io) => GeolapseError::config(format!(
                    "could not read GeoJSON {}: {io}",
                    path.display()
                )),
                GeolapseError::Json(json) => GeolapseError::config(format!(
                    "could not parse GeoJSON {}: {json}",
                    path.display()
                )),
                other => other,
            });
        }

        let [lat, lon] = self
            .latlon
            .ok_or_else(|| GeolapseError::config("no area given: set a lat/lon or a GeoJSON file"))?;
        match (self.resolution, self.tilesize, self.pad) {
            (Some(resolution), Some(tilesize), Some(pad)) => Ok(Geometry::Point {
                lat,
                lon,
                resolution,
                tilesize,
                pad,
            }),
            _ => Err(GeolapseError::config(
                "a lat/lon area needs resolution, tilesize and pad",
            )),
        }
    }
}

/// Everything a run needs, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Animation file name; must end in `.gif` or `.mp4`.
    pub output: PathBuf,
    /// Directory the animation and exports are written to.
    pub outdir: Option<PathBuf>,
    pub area: AreaConfig,
    pub products: Vec<String>,
    /// Bands in display order; `alpha` becomes the validity mask.
    pub bands: Vec<String>,
    /// Fixed [min, max] per display band.
    pub scales: Option<Vec<[f64; 2]>>,
    /// Low/high percentiles for global rescaling.
    pub rescale: Option<[f64; 2]>,
    pub start_datetime: String,
    pub end_datetime: String,
    pub filters: SceneFilter,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub flatten: Option<FlattenGranularity>,
    pub processing_level: Option<ProcessingLevel>,
    /// EPSG code or proj string for the output grid.
    pub crs: Option<String>,
    pub raster: RasterConfig,
    pub coregister: bool,
    pub reference_index: usize,
    pub cmap: Colormap,
    pub fps: u32,
    /// Output [width, height] in pixels.
    pub outsize: Option<[u32; 2]>,
    /// Crop to [width, height].
    pub aspect_ratio: Option<[f64; 2]>,
    pub backend: EncoderBackend,
    /// Write one TIFF per frame.
    pub export: bool,
    /// Write the area as GeoJSON.
    pub bbox: bool,
    /// Write a text summary of the scenes used.
    pub summary: bool,
    /// Re-encode with a browser-friendly H.264 profile.
    pub websafe: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("animation.gif"),
            outdir: None,
            area: AreaConfig::default(),
            products: vec!["landsat:LC08:01:RT:TOAR".to_string()],
            bands: vec!["red".into(), "green".into(), "blue".into()],
            scales: None,
            rescale: None,
            start_datetime: "2019-01-01".to_string(),
            end_datetime: "2019-04-01".to_string(),
            filters: SceneFilter::default(),
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            flatten: None,
            processing_level: None,
            crs: None,
            raster: RasterConfig::default(),
            coregister: false,
            reference_index: 0,
            cmap: Colormap::default(),
            fps: 1,
            outsize: None,
            aspect_ratio: None,
            backend: EncoderBackend::default(),
            export: false,
            bbox: false,
            summary: false,
            websafe: false,
        }
    }
}

/// A configuration that passed every check, with derived values filled in.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub grid: ResolvedGeometry,
    pub time_range: TimeRange,
    pub scale_mode: ScaleMode,
    pub format: OutputFormat,
    /// Final animation path (`outdir` joined with `output`).
    pub output_path: PathBuf,
}

impl AnimationConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            GeolapseError::config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GeolapseError::config(format!("failed to serialize config: {e}")))
    }

    /// Bands that end up in frames: the band list without `alpha`.
    pub fn display_bands(&self) -> Vec<&str> {
        self.bands
            .iter()
            .map(String::as_str)
            .filter(|b| *b != ALPHA_BAND)
            .collect()
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.outdir {
            Some(dir) => dir.join(&self.output),
            None => self.output.clone(),
        }
    }

    /// Check every value and derive the run plan. Touches no remote service.
    pub fn validate(&self) -> Result<RunPlan> {
        let output_path = self.output_path();
        let format = OutputFormat::from_path(&output_path)?;
        if format == OutputFormat::Mp4 && self.backend == EncoderBackend::Native {
            return Err(GeolapseError::config(
                "the native backend only writes .gif files",
            ));
        }

        let grid = self.area.geometry()?.resolve()?;

        let start = parse_instant(&self.start_datetime)?;
        let end = parse_instant(&self.end_datetime)?;
        let time_range = TimeRange::new(start, end)?;

        if self.products.is_empty() {
            return Err(GeolapseError::config("at least one product id is required"));
        }
        if self.bands.is_empty() {
            return Err(GeolapseError::config("at least one band is required"));
        }
        let display_bands = self.display_bands();
        if display_bands.is_empty() {
            return Err(GeolapseError::config("the band list has only an alpha band"));
        }
        if display_bands.len() == 2 {
            return Err(GeolapseError::config(
                "two display bands cannot be animated; give one band or at least three",
            ));
        }
        if display_bands.len() > DISPLAY_CHANNEL_COUNT {
            info!(bands = ?display_bands, "Only the first three bands will be animated");
        }

        let scale_mode = ScaleMode::from_options(self.scales.as_deref(), self.rescale)?;
        scale_mode.validate(display_bands.len())?;

        self.filters.validate()?;
        self.raster.validate()?;

        if let Some(crs) = &self.crs {
            let lower = crs.to_ascii_lowercase();
            if !(lower.contains("epsg") || lower.contains("proj")) {
                return Err(GeolapseError::config(format!(
                    "crs {crs:?} is neither an EPSG code nor a proj string"
                )));
            }
        }

        self.assemble_options().validate()?;

        Ok(RunPlan {
            grid,
            time_range,
            scale_mode,
            format,
            output_path,
        })
    }

    pub fn catalog_query(&self, plan: &RunPlan) -> CatalogQuery {
        CatalogQuery {
            bbox: plan.grid.bbox,
            time_range: plan.time_range.clone(),
            products: self.products.clone(),
            processing_level: self.processing_level,
            crs: self.crs.clone(),
        }
    }

    pub fn raster_job(&self, plan: &RunPlan) -> RasterJob {
        RasterJob {
            grid: plan.grid.clone(),
            bands: self.bands.clone(),
            crs: self.crs.clone(),
            processing_level: self.processing_level,
            config: self.raster.clone(),
        }
    }

    pub fn coregister_config(&self) -> CoregisterConfig {
        CoregisterConfig {
            reference_index: self.reference_index,
        }
    }

    pub fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            fps: self.fps,
            outsize: self.outsize.map(|[w, h]| (w, h)),
            aspect_ratio: self.aspect_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_config() -> AnimationConfig {
        AnimationConfig {
            area: AreaConfig {
                resolution: Some(15.0),
                tilesize: Some(64),
                pad: Some(0),
                ..AreaConfig::default()
            },
            ..AnimationConfig::default()
        }
    }

    #[test]
    fn defaults_need_tile_parameters() {
        assert!(AnimationConfig::default().validate().is_err());
        assert!(point_config().validate().is_ok());
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let mut config = point_config();
        config.flatten = Some(FlattenGranularity::Day);
        config.rescale = Some([2.0, 98.0]);
        let text = config.to_toml().unwrap();
        let back: AnimationConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AnimationConfig = toml::from_str(
            r#"
            output = "x.mp4"
            fps = 5
            [area]
            resolution = 30.0
            tilesize = 128
            pad = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.fps, 5);
        assert_eq!(config.bands.len(), 3);
        assert_eq!(config.area.latlon, Some([35.687, -105.9378]));
        assert_eq!(config.validate().unwrap().format, OutputFormat::Mp4);
    }
}
