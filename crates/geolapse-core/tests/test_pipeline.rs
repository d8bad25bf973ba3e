mod common;

use std::sync::{Arc, Mutex};

use common::{
    constant_raster, files_in, gradient_raster, point_config, scene, scene_with_cloud, services,
    ts, FailingEncoder, RecordingEncoder,
};
use geolapse_core::cancel::CancelToken;
use geolapse_core::catalog::{InMemoryCatalog, ServiceError};
use geolapse_core::error::GeolapseError;
use geolapse_core::flatten::FlattenGranularity;
use geolapse_core::pipeline::{
    run_pipeline, run_pipeline_reported, PipelineStage, ProgressReporter,
};

const SIZE: usize = 16;

fn three_scene_catalog(size: usize) -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_scene(scene("s1", ts(2019, 1, 10, 17)), gradient_raster(size, size, 0.0))
        .with_scene(scene("s2", ts(2019, 2, 11, 17)), gradient_raster(size, size, 0.1))
        .with_scene(scene("s3", ts(2019, 3, 12, 17)), gradient_raster(size, size, 0.2))
}

#[test]
fn test_one_frame_per_scene_without_flattening() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), 256);
    config.area.pad = Some(256);
    let encoder = Arc::new(RecordingEncoder::default());
    let (_, services) = services(three_scene_catalog(768), encoder.clone());

    let summary = run_pipeline(&config, &services).unwrap();

    assert_eq!(summary.frame_count, 3);
    assert_eq!(summary.buckets.len(), 3);
    assert!(summary.buckets.iter().all(|b| b.len() == 1));
    let calls = encoder.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(3, (768, 768), 1)]);
    assert!(dir.path().join("out.gif").exists());
}

#[test]
fn test_same_day_scenes_merge_into_their_mean() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.flatten = Some(FlattenGranularity::Day);
    let catalog = InMemoryCatalog::new()
        .with_scene(scene("a", ts(2019, 1, 10, 9)), constant_raster(SIZE, SIZE, [0.2, 0.2, 0.2]))
        .with_scene(scene("b", ts(2019, 1, 10, 15)), constant_raster(SIZE, SIZE, [0.6, 0.6, 0.6]))
        .with_scene(scene("c", ts(2019, 1, 11, 9)), constant_raster(SIZE, SIZE, [0.9, 0.9, 0.9]));
    let encoder = Arc::new(RecordingEncoder::default());
    let (_, services) = services(catalog, encoder.clone());

    let summary = run_pipeline(&config, &services).unwrap();

    assert_eq!(summary.buckets.len(), 2);
    assert_eq!(summary.buckets[0].scene_ids(), ["a", "b"]);
    assert_eq!(summary.scene_count(), 3);

    let frames = encoder.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    let merged = frames[0].get_pixel(3, 4);
    // mean 0.4 -> 102
    assert!((merged[0] as i32 - 102).abs() <= 1, "got {merged:?}");
    assert_eq!(merged[3], 255);
    assert!((frames[1].get_pixel(0, 0)[0] as i32 - 230).abs() <= 1);
}

#[test]
fn test_batch_size_does_not_change_the_animation() {
    let run = |raster_len: usize| {
        let dir = tempfile::tempdir().unwrap();
        let mut config = point_config(dir.path(), SIZE);
        config.flatten = Some(FlattenGranularity::Year);
        config.rescale = Some([2.0, 98.0]);
        config.raster.raster_len = raster_len;
        let encoder = Arc::new(RecordingEncoder::default());
        let (catalog, services) = services(three_scene_catalog(SIZE), encoder.clone());
        run_pipeline(&config, &services).unwrap();
        let frames = encoder.frames.lock().unwrap().clone();
        (frames, catalog.raster_calls().len())
    };

    let (single, single_calls) = run(500);
    let (split, split_calls) = run(1);
    assert_eq!(single_calls, 1);
    assert_eq!(split_calls, 3);
    assert_eq!(single.len(), 1);
    for (a, b) in single[0].pixels().zip(split[0].pixels()) {
        for ch in 0..4 {
            assert!((a[ch] as i32 - b[ch] as i32).abs() <= 1);
        }
    }
}

#[test]
fn test_scale_count_mismatch_fails_before_any_remote_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.scales = Some(vec![[0.0, 1.0], [0.0, 1.0]]);
    let encoder = Arc::new(RecordingEncoder::default());
    let (catalog, services) = services(three_scene_catalog(SIZE), encoder.clone());

    let err = run_pipeline(&config, &services).unwrap_err();

    assert!(matches!(err, GeolapseError::Config(_)), "{err}");
    assert_eq!(catalog.query_calls(), 0);
    assert!(catalog.raster_calls().is_empty());
    assert_eq!(encoder.call_count(), 0);
}

#[test]
fn test_all_buckets_failing_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = point_config(dir.path(), SIZE);
    let catalog = three_scene_catalog(SIZE)
        .fail_scene("s1", ServiceError::Rejected("no".into()))
        .fail_scene("s2", ServiceError::Rejected("no".into()))
        .fail_scene("s3", ServiceError::Rejected("no".into()));
    let encoder = Arc::new(RecordingEncoder::default());
    let (_, services) = services(catalog, encoder.clone());

    let err = run_pipeline(&config, &services).unwrap_err();

    assert!(matches!(err, GeolapseError::AllBucketsFailed { dropped: 3 }));
    assert_eq!(encoder.call_count(), 0);
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_failed_buckets_are_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = point_config(dir.path(), SIZE);
    let catalog =
        three_scene_catalog(SIZE).fail_scene("s2", ServiceError::Rejected("corrupt".into()));
    let encoder = Arc::new(RecordingEncoder::default());
    let (_, services) = services(catalog, encoder.clone());

    let summary = run_pipeline(&config, &services).unwrap();

    assert_eq!(summary.frame_count, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].scene_ids, ["s2"]);
    let kept: Vec<String> = summary.buckets.iter().flat_map(|b| b.scene_ids()).collect();
    assert_eq!(kept, ["s1", "s3"]);
}

#[test]
fn test_unreachable_catalog_is_a_catalog_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = point_config(dir.path(), SIZE);
    let catalog = three_scene_catalog(SIZE).unreachable("connection refused");
    let (_, services) = services(catalog, Arc::new(RecordingEncoder::default()));

    let err = run_pipeline(&config, &services).unwrap_err();
    assert!(matches!(err, GeolapseError::Catalog(_)));
}

#[test]
fn test_filters_removing_everything_is_a_catalog_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.filters.cloud_fraction = Some(0.1);
    let catalog = InMemoryCatalog::new()
        .with_scene(
            scene_with_cloud("a", ts(2019, 1, 10, 9), Some(0.5)),
            constant_raster(SIZE, SIZE, [0.5; 3]),
        );
    let (catalog, services) = services(catalog, Arc::new(RecordingEncoder::default()));

    let err = run_pipeline(&config, &services).unwrap_err();
    assert!(matches!(err, GeolapseError::Catalog(_)));
    assert!(catalog.raster_calls().is_empty());
}

#[test]
fn test_encoder_failure_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = point_config(dir.path(), SIZE);
    let (_, services) = services(three_scene_catalog(SIZE), Arc::new(FailingEncoder));

    let err = run_pipeline(&config, &services).unwrap_err();

    match err {
        GeolapseError::Encode {
            path,
            frames,
            backend,
            message,
        } => {
            assert_eq!(path, dir.path().join("out.gif"));
            assert_eq!(frames, 3);
            assert_eq!(backend, "failing");
            assert!(message.contains("encoder crashed"));
        }
        other => panic!("expected an encode error, got {other}"),
    }
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_exports_are_written_next_to_the_animation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.export = true;
    config.bbox = true;
    config.summary = true;
    let (_, services) = services(three_scene_catalog(SIZE), Arc::new(RecordingEncoder::default()));

    let summary = run_pipeline(&config, &services).unwrap();

    assert!(summary.export_errors.is_empty(), "{:?}", summary.export_errors);
    let out = dir.path();
    assert!(out.join("out.geojson").exists());
    assert!(out.join("out.txt").exists());
    for id in ["s1", "s2", "s3"] {
        assert!(out.join("out").join(format!("{id}.tif")).exists());
    }
    let text = std::fs::read_to_string(out.join("out.txt")).unwrap();
    assert!(text.contains("s2"));
    assert_eq!(summary.exports.len(), 5);
}

#[test]
fn test_websafe_never_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.websafe = true;
    let (_, services) = services(three_scene_catalog(SIZE), Arc::new(RecordingEncoder::default()));

    let summary = run_pipeline(&config, &services).unwrap();

    assert!(summary.output.exists());
    let websafe = dir.path().join("out_websafe.mp4");
    assert!(summary.exports.contains(&websafe) || summary.export_errors.len() == 1);
}

#[test]
fn test_coregistration_runs_inside_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.coregister = true;
    config.reference_index = 1;
    let catalog = InMemoryCatalog::new()
        .with_scene(scene("s1", ts(2019, 1, 10, 17)), gradient_raster(SIZE, SIZE, 0.1))
        .with_scene(scene("s2", ts(2019, 2, 11, 17)), gradient_raster(SIZE, SIZE, 0.1));
    let encoder = Arc::new(RecordingEncoder::default());
    let (_, services) = services(catalog, encoder.clone());

    let summary = run_pipeline(&config, &services).unwrap();

    assert_eq!(summary.frame_count, 2);
    assert!(summary.warnings.is_empty());
    let calls = encoder.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(2, (SIZE as u32, SIZE as u32), 1)]);
}

#[derive(Default)]
struct StageLog(Mutex<Vec<PipelineStage>>);

impl ProgressReporter for StageLog {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.0.lock().unwrap().push(stage);
    }
}

#[test]
fn test_stages_are_reported_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = point_config(dir.path(), SIZE);
    config.bbox = true;
    let (_, services) = services(three_scene_catalog(SIZE), Arc::new(RecordingEncoder::default()));
    let log = Arc::new(StageLog::default());

    run_pipeline_reported(&config, &services, log.clone(), &CancelToken::new()).unwrap();

    let stages = log.0.lock().unwrap().clone();
    assert_eq!(
        stages,
        vec![
            PipelineStage::Querying,
            PipelineStage::Selecting,
            PipelineStage::Rasterizing,
            PipelineStage::Normalizing,
            PipelineStage::Encoding,
            PipelineStage::Exporting,
        ]
    );
}

#[test]
fn test_cancelled_run_does_not_query() {
    let dir = tempfile::tempdir().unwrap();
    let config = point_config(dir.path(), SIZE);
    let (catalog, services) =
        services(three_scene_catalog(SIZE), Arc::new(RecordingEncoder::default()));
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = run_pipeline_reported(&config, &services, Arc::new(StageLog::default()), &cancel)
        .unwrap_err();
    assert!(matches!(err, GeolapseError::Cancelled));
    assert_eq!(catalog.query_calls(), 0);
}
