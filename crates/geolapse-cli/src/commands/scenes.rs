use anyhow::{Context, Result};
use clap::Args;
use geolapse_core::pipeline::{plan_buckets, ProgressReporter};

use super::flags::ConfigFlags;
use crate::summary::{print_bucket_table, print_run_plan};

#[derive(Args)]
pub struct ScenesArgs {
    #[command(flatten)]
    pub flags: ConfigFlags,
}

struct Silent;
impl ProgressReporter for Silent {}

pub fn run(args: &ScenesArgs) -> Result<()> {
    let config = args.flags.load()?;
    let plan = config.validate()?;
    let archive = args.flags.open_catalog()?;
    print_run_plan(&config, &args.flags.catalog);

    let buckets =
        plan_buckets(&config, &plan, archive.as_ref(), &Silent).context("Scene search failed")?;
    print_bucket_table(&buckets);
    Ok(())
}
