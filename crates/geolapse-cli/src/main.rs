mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geolapse", about = "Satellite imagery time-lapse builder")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an animation from the scenes over an area
    Run(commands::pipeline::RunArgs),
    /// List the scene groups a run would animate, without rasterizing
    Scenes(commands::scenes::ScenesArgs),
    /// Print or save the default configuration as TOML
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Run(args) => commands::pipeline::run(args),
        Commands::Scenes(args) => commands::scenes::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
