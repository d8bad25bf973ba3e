use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use geolapse_core::cancel::CancelToken;
use geolapse_core::consts::DEFAULT_RESCALE_PERCENTILES;
use geolapse_core::pipeline::{
    run_pipeline_reported, AnimationConfig, PipelineStage, ProgressReporter, Services,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::flags::ConfigFlags;
use crate::summary::{print_run_plan, print_run_summary};

#[derive(Args)]
pub struct RunArgs {
    /// Output animation (.gif or .mp4)
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub flags: ConfigFlags,

    /// Global rescale percentiles LOW HIGH (2 98 when given without values)
    #[arg(long, num_args = 0..=2, value_names = ["LOW", "HIGH"])]
    pub rescale: Option<Vec<f64>>,

    /// Output size as WIDTH HEIGHT in pixels
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub outsize: Option<Vec<u32>>,

    /// Crop frames to WIDTH HEIGHT aspect ratio
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub aspect_ratio: Option<Vec<f64>>,

    /// Align frames to a reference frame to remove jitter
    #[arg(long)]
    pub coregister: bool,

    /// Frame index used as the coregistration reference
    #[arg(long)]
    pub reference_index: Option<usize>,

    /// Directory to write the animation and exports to
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// Colormap for single-band animations
    #[arg(long)]
    pub cmap: Option<String>,

    /// Frames per second (1-30)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Encoder backend (ffmpeg | imagemagick | native)
    #[arg(long)]
    pub backend: Option<String>,

    /// Export each frame as a 16-bit TIFF
    #[arg(long)]
    pub export: bool,

    /// Write the area bounding box as GeoJSON
    #[arg(long)]
    pub bbox: bool,

    /// Write a text summary of the scenes used
    #[arg(long)]
    pub summary: bool,

    /// Also write a browser-friendly H.264 copy
    #[arg(long)]
    pub websafe: bool,
}

impl RunArgs {
    fn build_config(&self) -> Result<AnimationConfig> {
        let mut config = self.flags.load()?;
        if let Some(output) = &self.output_file {
            config.output = output.clone();
        }
        if let Some(rescale) = &self.rescale {
            config.rescale = match rescale.as_slice() {
                [] => Some(DEFAULT_RESCALE_PERCENTILES),
                [low, high] => Some([*low, *high]),
                other => anyhow::bail!("--rescale takes LOW HIGH, got {} value(s)", other.len()),
            };
            if self.flags.scales.is_none() {
                config.scales = None;
            }
        }
        if let Some(size) = &self.outsize {
            config.outsize = Some([size[0], size[1]]);
        }
        if let Some(ratio) = &self.aspect_ratio {
            config.aspect_ratio = Some([ratio[0], ratio[1]]);
        }
        config.coregister |= self.coregister;
        if let Some(index) = self.reference_index {
            config.reference_index = index;
        }
        if self.outdir.is_some() {
            config.outdir = self.outdir.clone();
        }
        if let Some(cmap) = &self.cmap {
            config.cmap = cmap.parse()?;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.parse()?;
        }
        config.export |= self.export;
        config.bbox |= self.bbox;
        config.summary |= self.summary;
        config.websafe |= self.websafe;
        Ok(config)
    }
}

/// Drives one indicatif bar across pipeline stages.
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:30} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        self.bar.reset();
        self.bar.set_length(total_items.unwrap_or(1) as u64);
        self.bar.set_message(stage.to_string());
    }

    fn advance(&self, items_done: usize) {
        self.bar.set_position(items_done as u64);
    }

    fn finish_stage(&self) {
        if let Some(len) = self.bar.length() {
            self.bar.set_position(len);
        }
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = args.build_config()?;
    debug!(?config, "Loaded configuration");
    let archive = args.flags.open_catalog()?;
    print_run_plan(&config, &args.flags.catalog);

    let services = Services::new(
        archive.clone(),
        archive,
        Arc::from(config.backend.encoder()),
    );
    let reporter = Arc::new(BarReporter::new()?);
    let summary = run_pipeline_reported(&config, &services, reporter.clone(), &CancelToken::new())
        .context("Animation failed")?;
    reporter.bar.finish_with_message("Done");

    print_run_summary(&summary);
    Ok(())
}
