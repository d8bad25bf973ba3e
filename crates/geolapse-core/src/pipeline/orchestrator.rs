use std::sync::Arc;

use tracing::{info, warn};

use crate::align::coregister_frames;
use crate::cancel::CancelToken;
use crate::catalog::{find_scenes, RasterService, SceneCatalog};
use crate::error::{GeolapseError, Result};
use crate::export::{export_frame_tiffs, sibling_path, write_bbox_geojson, write_summary};
use crate::flatten::{flatten, Bucket};
use crate::frame::{ensure_uniform_shape, Frame};
use crate::normalize::{apply_colormap, normalize_frames};
use crate::raster::rasterize_buckets;
use crate::render::{assemble_animation, make_websafe, AnimationEncoder};
use crate::selection::{apply_filters, sort_scenes};

use super::config::{AnimationConfig, RunPlan};
use super::types::{NoOpReporter, PipelineStage, ProgressReporter, RunSummary};

/// The external collaborators of a run.
pub struct Services {
    pub catalog: Arc<dyn SceneCatalog>,
    pub raster: Arc<dyn RasterService>,
    pub encoder: Arc<dyn AnimationEncoder>,
}

impl Services {
    pub fn new(
        catalog: Arc<dyn SceneCatalog>,
        raster: Arc<dyn RasterService>,
        encoder: Arc<dyn AnimationEncoder>,
    ) -> Self {
        Self {
            catalog,
            raster,
            encoder,
        }
    }
}

/// Query, filter, sort and flatten: the bucket plan a run would rasterize.
pub fn plan_buckets(
    config: &AnimationConfig,
    plan: &RunPlan,
    catalog: &dyn SceneCatalog,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<Bucket>> {
    reporter.begin_stage(PipelineStage::Querying, None);
    let found = find_scenes(catalog, &config.catalog_query(plan))?;
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Selecting, Some(found.len()));
    let total = found.len();
    let mut scenes = apply_filters(found, &config.filters);
    if scenes.is_empty() {
        return Err(GeolapseError::catalog(format!(
            "all {total} scenes were removed by the metadata filters"
        )));
    }
    sort_scenes(&mut scenes, config.sort_field, config.sort_order);
    let buckets = flatten(scenes, config.flatten);
    reporter.finish_stage();

    info!(
        found = total,
        buckets = buckets.len(),
        sort = %config.sort_field,
        order = %config.sort_order,
        "Scene plan ready"
    );
    Ok(buckets)
}

/// Buckets that produced a frame, in frame order.
fn surviving_buckets(buckets: Vec<Bucket>, frames: &[Frame]) -> Vec<Bucket> {
    let mut next = frames.iter().peekable();
    buckets
        .into_iter()
        .filter(|bucket| match next.peek() {
            Some(frame) if frame.key == bucket.key && frame.scene_ids == bucket.scene_ids() => {
                next.next();
                true
            }
            _ => false,
        })
        .collect()
}

/// Run the full pipeline with a thread-safe progress reporter and a cancel token.
///
/// Every configuration check runs before the catalog is contacted. Once the
/// animation exists, export failures are recorded in the summary instead of
/// failing the run.
pub fn run_pipeline_reported(
    config: &AnimationConfig,
    services: &Services,
    reporter: Arc<dyn ProgressReporter>,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let plan = config.validate()?;
    info!(
        rows = plan.grid.rows,
        cols = plan.grid.cols,
        resolution = plan.grid.resolution,
        output = %plan.output_path.display(),
        "Configuration valid"
    );
    cancel.check()?;

    let buckets = plan_buckets(config, &plan, services.catalog.as_ref(), reporter.as_ref())?;

    reporter.begin_stage(PipelineStage::Rasterizing, Some(buckets.len()));
    let r = reporter.clone();
    let outcome = rasterize_buckets(
        &buckets,
        &services.raster,
        &config.raster_job(&plan),
        cancel,
        move |done| r.advance(done),
    )?;
    reporter.finish_stage();

    let mut frames = outcome.frames;
    ensure_uniform_shape(&frames)?;

    if config.coregister {
        cancel.check()?;
        reporter.begin_stage(PipelineStage::Registering, Some(frames.len()));
        let r = reporter.clone();
        frames = coregister_frames(frames, &config.coregister_config(), move |done| {
            r.advance(done)
        })?;
        reporter.finish_stage();
    }
    let warnings = frames
        .iter()
        .filter_map(|f| f.warning.clone().map(|w| (f.key, w)))
        .collect();

    reporter.begin_stage(PipelineStage::Normalizing, None);
    let (normalized, scales) = normalize_frames(frames, &plan.scale_mode)?;
    let rendered: Vec<Frame> = normalized
        .iter()
        .map(|f| apply_colormap(f, config.cmap))
        .collect();
    reporter.finish_stage();

    cancel.check()?;
    reporter.begin_stage(PipelineStage::Encoding, None);
    let output = assemble_animation(
        &rendered,
        services.encoder.as_ref(),
        &config.assemble_options(),
        &plan.output_path,
        cancel,
    )?;
    reporter.finish_stage();
    info!(output = %output.display(), frames = rendered.len(), "Animation written");

    let mut summary = RunSummary {
        output: output.clone(),
        bbox: plan.grid.bbox,
        buckets: surviving_buckets(buckets, &normalized),
        failed: outcome.failed,
        filtered: outcome.filtered,
        warnings,
        scales,
        frame_count: rendered.len(),
        exports: Vec::new(),
        export_errors: Vec::new(),
    };

    if config.export || config.bbox || config.websafe || config.summary {
        reporter.begin_stage(PipelineStage::Exporting, None);
        let mut record = |what: &str, result: Result<Vec<std::path::PathBuf>>| match result {
            Ok(paths) => summary.exports.extend(paths),
            Err(e) => {
                warn!(export = what, error = %e, "Export failed");
                summary.export_errors.push(format!("{what}: {e}"));
            }
        };

        if config.export {
            let dir = sibling_path(&output, "");
            record("frames", export_frame_tiffs(&normalized, &dir));
        }
        if config.bbox {
            let path = sibling_path(&output, ".geojson");
            record("bbox", write_bbox_geojson(&plan.grid, &path).map(|_| vec![path]));
        }
        if config.websafe {
            record("websafe", make_websafe(&output, rendered.len()).map(|p| vec![p]));
        }
        if config.summary {
            let path = sibling_path(&output, ".txt");
            let result = write_summary(&summary, &path).map(|_| vec![path]);
            match result {
                Ok(paths) => summary.exports.extend(paths),
                Err(e) => {
                    warn!(export = "summary", error = %e, "Export failed");
                    summary.export_errors.push(format!("summary: {e}"));
                }
            }
        }
        reporter.finish_stage();
    }

    Ok(summary)
}

/// Run the full pipeline without progress reporting.
pub fn run_pipeline(config: &AnimationConfig, services: &Services) -> Result<RunSummary> {
    let reporter = Arc::new(NoOpReporter);
    run_pipeline_reported(config, services, reporter, &CancelToken::new())
}
