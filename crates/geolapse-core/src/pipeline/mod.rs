pub mod config;
mod orchestrator;
mod types;

pub use config::{AnimationConfig, AreaConfig, RunPlan};
pub use orchestrator::{plan_buckets, run_pipeline, run_pipeline_reported, Services};
pub use types::{PipelineStage, ProgressReporter, RunSummary};
