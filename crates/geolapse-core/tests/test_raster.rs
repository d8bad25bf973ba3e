mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use common::{constant_raster, gradient_raster, scene, ts, with_mask};
use geolapse_core::cancel::CancelToken;
use geolapse_core::catalog::{InMemoryCatalog, RasterService, ServiceError};
use geolapse_core::error::GeolapseError;
use geolapse_core::flatten::{flatten, Bucket, FlattenGranularity};
use geolapse_core::geometry::Geometry;
use geolapse_core::raster::{rasterize_buckets, RasterConfig, RasterJob};

const SIZE: usize = 8;

fn job(raster_len: usize, bands: &[&str]) -> RasterJob {
    let grid = Geometry::Point {
        lat: 35.0,
        lon: -106.0,
        resolution: 30.0,
        tilesize: SIZE,
        pad: 0,
    }
    .resolve()
    .unwrap();
    RasterJob {
        grid,
        bands: bands.iter().map(|b| b.to_string()).collect(),
        crs: None,
        processing_level: None,
        config: RasterConfig {
            raster_len,
            retry_backoff_ms: 1,
            ..RasterConfig::default()
        },
    }
}

fn rgb_job(raster_len: usize) -> RasterJob {
    job(raster_len, &["red", "green", "blue"])
}

/// One bucket holding three scenes on the same day.
fn three_scene_bucket(catalog: InMemoryCatalog) -> (Vec<Bucket>, Arc<InMemoryCatalog>) {
    let scenes = vec![
        scene("a", ts(2019, 2, 1, 9)),
        scene("b", ts(2019, 2, 1, 10)),
        scene("c", ts(2019, 2, 1, 11)),
    ];
    let catalog = catalog
        .with_scene(scenes[0].clone(), gradient_raster(SIZE, SIZE, 0.0))
        .with_scene(scenes[1].clone(), gradient_raster(SIZE, SIZE, 0.3))
        .with_scene(scenes[2].clone(), gradient_raster(SIZE, SIZE, 0.9));
    (
        flatten(scenes, Some(FlattenGranularity::Day)),
        Arc::new(catalog),
    )
}

fn service(catalog: &Arc<InMemoryCatalog>) -> Arc<dyn RasterService> {
    catalog.clone()
}

#[test]
fn test_batch_size_does_not_change_the_mean() {
    let (buckets, catalog) = three_scene_bucket(InMemoryCatalog::new());
    let one_call = rasterize_buckets(&buckets, &service(&catalog), &rgb_job(500), &CancelToken::new(), |_| {})
        .unwrap();
    assert_eq!(catalog.raster_calls(), vec![vec!["a", "b", "c"]]);

    let (buckets, catalog) = three_scene_bucket(InMemoryCatalog::new());
    let split = rasterize_buckets(&buckets, &service(&catalog), &rgb_job(1), &CancelToken::new(), |_| {})
        .unwrap();
    assert_eq!(
        catalog.raster_calls(),
        vec![vec!["a"], vec!["b"], vec!["c"]]
    );

    let a = &one_call.frames[0].data;
    let b = &split.frames[0].data;
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
    assert_abs_diff_eq!(a[[0, 0, 0]], 0.4, epsilon = 1e-5);
}

#[test]
fn test_mean_skips_masked_scenes_per_pixel() {
    let mut mask = Array2::from_elem((SIZE, SIZE), true);
    mask[[0, 0]] = false;
    let scenes = vec![scene("a", ts(2019, 2, 1, 9)), scene("b", ts(2019, 2, 1, 10))];
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_scene(
                scenes[0].clone(),
                with_mask(constant_raster(SIZE, SIZE, [1.0, 1.0, 1.0]), mask),
            )
            .with_scene(scenes[1].clone(), constant_raster(SIZE, SIZE, [0.5, 0.5, 0.5])),
    );
    let buckets = flatten(scenes, Some(FlattenGranularity::Day));
    let outcome =
        rasterize_buckets(&buckets, &service(&catalog), &rgb_job(500), &CancelToken::new(), |_| {})
            .unwrap();
    let frame = &outcome.frames[0];
    assert_abs_diff_eq!(frame.data[[0, 0, 0]], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(frame.data[[1, 1, 0]], 0.75, epsilon = 1e-6);
    assert!(frame.is_valid(0, 0));
}

#[test]
fn test_alpha_band_becomes_the_mask() {
    let mut mask = Array2::from_elem((SIZE, SIZE), true);
    mask[[2, 3]] = false;
    let s = scene("a", ts(2019, 2, 1, 9));
    let catalog = Arc::new(InMemoryCatalog::new().with_scene(
        s.clone(),
        with_mask(constant_raster(SIZE, SIZE, [0.2, 0.4, 0.6]), mask),
    ));
    let buckets = flatten(vec![s], None);
    let outcome = rasterize_buckets(
        &buckets,
        &service(&catalog),
        &job(500, &["red", "green", "blue", "alpha"]),
        &CancelToken::new(),
        |_| {},
    )
    .unwrap();
    let frame = &outcome.frames[0];
    assert_eq!(frame.band_count(), 3);
    assert!(!frame.is_valid(2, 3));
    assert!(frame.is_valid(3, 2));
}

#[test]
fn test_transient_failures_are_retried() {
    let (buckets, catalog) = three_scene_bucket(InMemoryCatalog::new().fail_scene_times(
        "b",
        ServiceError::Unavailable("busy".into()),
        2,
    ));
    let outcome = rasterize_buckets(&buckets, &service(&catalog), &rgb_job(1), &CancelToken::new(), |_| {})
        .unwrap();
    assert_eq!(outcome.frames.len(), 1);
    assert!(outcome.failed.is_empty());
    // a, then b three times, then c
    assert_eq!(catalog.raster_calls().len(), 5);
}

#[test]
fn test_rejections_are_not_retried() {
    let scenes = vec![scene("a", ts(2019, 2, 1, 9)), scene("b", ts(2019, 2, 2, 9))];
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_scene(scenes[0].clone(), constant_raster(SIZE, SIZE, [0.1; 3]))
            .with_scene(scenes[1].clone(), constant_raster(SIZE, SIZE, [0.2; 3]))
            .fail_scene("b", ServiceError::Rejected("bad scene".into())),
    );
    let buckets = flatten(scenes, None);
    let outcome = rasterize_buckets(&buckets, &service(&catalog), &rgb_job(500), &CancelToken::new(), |_| {})
        .unwrap();

    assert_eq!(outcome.frames.len(), 1);
    assert_eq!(outcome.frames[0].scene_ids, ["a"]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].scene_ids, ["b"]);
    assert_eq!(catalog.raster_calls().len(), 2);
}

#[test]
fn test_slow_calls_time_out() {
    let s = scene("a", ts(2019, 2, 1, 9));
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_scene(s.clone(), constant_raster(SIZE, SIZE, [0.1; 3]))
            .with_raster_delay(Duration::from_millis(300)),
    );
    let mut slow = rgb_job(500);
    slow.config.timeout_secs = 0.02;
    let err = rasterize_buckets(&flatten(vec![s], None), &service(&catalog), &slow, &CancelToken::new(), |_| {})
        .unwrap_err();
    assert!(matches!(err, GeolapseError::AllBucketsFailed { dropped: 1 }));
}

#[test]
fn test_all_buckets_failing_is_fatal() {
    let scenes = vec![scene("a", ts(2019, 2, 1, 9)), scene("b", ts(2019, 2, 2, 9))];
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_descriptor(scenes[0].clone())
            .with_descriptor(scenes[1].clone()),
    );
    let err = rasterize_buckets(
        &flatten(scenes, None),
        &service(&catalog),
        &rgb_job(500),
        &CancelToken::new(),
        |_| {},
    )
    .unwrap_err();
    assert!(matches!(err, GeolapseError::AllBucketsFailed { dropped: 2 }));
}

#[test]
fn test_parallel_workers_keep_bucket_order() {
    let scenes: Vec<_> = (0..6)
        .map(|i| scene(&format!("s{i}"), ts(2019, 2, 1 + i, 9)))
        .collect();
    let mut catalog = InMemoryCatalog::new();
    for (i, s) in scenes.iter().enumerate() {
        catalog = catalog.with_scene(s.clone(), constant_raster(SIZE, SIZE, [i as f32; 3]));
    }
    let catalog = Arc::new(catalog);
    let mut parallel = rgb_job(500);
    parallel.config.workers = 3;

    let done = AtomicUsize::new(0);
    let outcome = rasterize_buckets(
        &flatten(scenes, None),
        &service(&catalog),
        &parallel,
        &CancelToken::new(),
        |_| {
            done.fetch_add(1, Ordering::Relaxed);
        },
    )
    .unwrap();

    assert_eq!(done.load(Ordering::Relaxed), 6);
    let firsts: Vec<f32> = outcome.frames.iter().map(|f| f.data[[0, 0, 0]]).collect();
    assert_eq!(firsts, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_low_coverage_frames_are_discarded() {
    let mut sparse = Array2::from_elem((SIZE, SIZE), false);
    sparse[[0, 0]] = true;
    let scenes = vec![scene("full", ts(2019, 2, 1, 9)), scene("sparse", ts(2019, 2, 2, 9))];
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_scene(scenes[0].clone(), constant_raster(SIZE, SIZE, [0.1; 3]))
            .with_scene(
                scenes[1].clone(),
                with_mask(constant_raster(SIZE, SIZE, [0.1; 3]), sparse),
            ),
    );
    let mut job = rgb_job(500);
    job.config.min_coverage = Some(0.5);
    let outcome = rasterize_buckets(&flatten(scenes, None), &service(&catalog), &job, &CancelToken::new(), |_| {})
        .unwrap();
    assert_eq!(outcome.frames.len(), 1);
    assert_eq!(outcome.filtered.len(), 1);
    assert_eq!(outcome.filtered[0].scene_ids, ["sparse"]);
}

#[test]
fn test_cancelled_run_stops() {
    let (buckets, catalog) = three_scene_bucket(InMemoryCatalog::new());
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = rasterize_buckets(&buckets, &service(&catalog), &rgb_job(1), &cancel, |_| {}).unwrap_err();
    assert!(matches!(err, GeolapseError::Cancelled));
    assert!(catalog.raster_calls().is_empty());
}

#[test]
fn test_cancel_interrupts_a_pending_call() {
    let s = scene("a", ts(2019, 2, 1, 9));
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_scene(s.clone(), constant_raster(SIZE, SIZE, [0.1; 3]))
            .with_raster_delay(Duration::from_secs(3)),
    );
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = rasterize_buckets(&flatten(vec![s], None), &service(&catalog), &rgb_job(500), &cancel, |_| {})
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, GeolapseError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(catalog.raster_calls().len(), 1);
}

#[test]
fn test_raster_config_bounds() {
    let mut config = RasterConfig::default();
    assert!(config.validate().is_ok());
    config.raster_len = 0;
    assert!(config.validate().is_err());
    config.raster_len = 501;
    assert!(config.validate().is_err());
    config.raster_len = 10;
    config.timeout_secs = 0.0;
    assert!(config.validate().is_err());
}
