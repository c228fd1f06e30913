//! dlb-rm CLI - inspect and plan DLB resource partitioning.

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// dlb-rm: DLB scheduling-domain resource manager
#[derive(Parser)]
#[command(name = "dlb-rm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table")]
    format: output::OutputFormat,

    /// Device configuration file (defaults to the standard locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resources available to each function
    Resources(commands::ResourcesArgs),

    /// Show the effective device configuration
    Config,

    /// Apply a partitioning plan to a simulated device
    Plan(commands::PlanArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = commands::device_config(cli.config.as_deref()).and_then(|config| {
        match cli.command {
            Commands::Resources(args) => commands::resources(&args, config, cli.format),
            Commands::Config => commands::config(&config, cli.format),
            Commands::Plan(args) => commands::plan(&args, config, cli.format),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
