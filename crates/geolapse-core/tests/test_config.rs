mod common;

use std::io::Write;
use std::path::PathBuf;

use common::point_config;
use geolapse_core::error::GeolapseError;
use geolapse_core::pipeline::{AnimationConfig, AreaConfig};
use geolapse_core::render::{EncoderBackend, OutputFormat};

fn valid() -> AnimationConfig {
    point_config(std::path::Path::new("/tmp/geolapse-test"), 32)
}

fn config_error(config: &AnimationConfig) -> bool {
    matches!(config.validate(), Err(GeolapseError::Config(_)))
}

#[test]
fn test_valid_config_produces_plan() {
    let plan = valid().validate().unwrap();
    assert_eq!((plan.grid.rows, plan.grid.cols), (32, 32));
    assert_eq!(plan.format, OutputFormat::Gif);
    assert_eq!(plan.output_path, PathBuf::from("/tmp/geolapse-test/out.gif"));
    assert!(plan.time_range.start < plan.time_range.end);
}

#[test]
fn test_bad_output_extension() {
    let mut config = valid();
    config.output = PathBuf::from("out.avi");
    assert!(config_error(&config));
}

#[test]
fn test_native_backend_cannot_write_mp4() {
    let mut config = valid();
    config.backend = EncoderBackend::Native;
    assert!(config.validate().is_ok());
    config.output = PathBuf::from("out.mp4");
    assert!(config_error(&config));
}

#[test]
fn test_inverted_time_range() {
    let mut config = valid();
    config.start_datetime = "2019-05-01".into();
    config.end_datetime = "2019-04-01".into();
    assert!(config_error(&config));
    config.start_datetime = "last tuesday".into();
    assert!(config_error(&config));
}

#[test]
fn test_band_list_checks() {
    let mut config = valid();
    config.bands = vec!["alpha".into()];
    assert!(config_error(&config));
    config.bands = vec!["red".into(), "green".into()];
    assert!(config_error(&config));
    config.bands = vec!["nir".into()];
    assert!(config.validate().is_ok());
    config.bands = vec!["red".into(), "green".into(), "blue".into(), "alpha".into()];
    assert!(config.validate().is_ok());
}

#[test]
fn test_scales_and_rescale_are_exclusive() {
    let mut config = valid();
    config.scales = Some(vec![[0.0, 1.0]; 3]);
    assert!(config.validate().is_ok());
    config.rescale = Some([2.0, 98.0]);
    assert!(config_error(&config));
}

#[test]
fn test_fps_and_outsize_bounds() {
    let mut config = valid();
    config.fps = 0;
    assert!(config_error(&config));
    config.fps = 31;
    assert!(config_error(&config));
    config.fps = 30;
    config.outsize = Some([0, 100]);
    assert!(config_error(&config));
    config.outsize = Some([320, 240]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_crs_must_look_like_a_crs() {
    let mut config = valid();
    config.crs = Some("EPSG:3857".into());
    assert!(config.validate().is_ok());
    config.crs = Some("+proj=utm +zone=13".into());
    assert!(config.validate().is_ok());
    config.crs = Some("mercator".into());
    assert!(config_error(&config));
}

#[test]
fn test_point_area_needs_all_tile_parameters() {
    let mut config = valid();
    config.area.pad = None;
    assert!(config_error(&config));
    config.area = AreaConfig {
        latlon: Some([95.0, 0.0]),
        resolution: Some(30.0),
        tilesize: Some(32),
        pad: Some(0),
        geojson: None,
    };
    assert!(config_error(&config));
}

#[test]
fn test_geojson_area_replaces_point() {
    let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
    write!(
        file,
        r#"{{"type": "Feature", "properties": {{}}, "geometry": {{
            "type": "Polygon",
            "coordinates": [[[-106.0, 35.0], [-105.9, 35.0], [-105.9, 35.1], [-106.0, 35.1], [-106.0, 35.0]]]
        }}}}"#
    )
    .unwrap();

    let mut config = valid();
    config.area.geojson = Some(file.path().to_path_buf());
    // resolution + tilesize together is ambiguous for a polygon
    assert!(config_error(&config));

    config.area.tilesize = None;
    config.area.pad = None;
    let plan = config.validate().unwrap();
    assert!((plan.grid.bbox.min_lon + 106.0).abs() < 1e-9);
    assert!(plan.grid.rows > 1 && plan.grid.cols > 1);
}

#[test]
fn test_missing_geojson_file_is_config_error() {
    let mut config = valid();
    config.area.geojson = Some(PathBuf::from("/definitely/not/here.geojson"));
    config.area.tilesize = None;
    config.area.pad = None;
    assert!(config_error(&config));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geolapse.toml");
    let mut config = valid();
    config.products = vec!["sentinel-2:L1C".into()];
    config.filters.cloud_fraction = Some(0.3);
    config.raster.timeout_secs = 12.5;
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    let loaded = AnimationConfig::from_toml_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_unknown_enum_values_are_rejected() {
    let text = r#"
        sort_field = "brightness"
    "#;
    assert!(toml::from_str::<AnimationConfig>(text).is_err());
    assert!("webm".parse::<EncoderBackend>().is_err());
}
