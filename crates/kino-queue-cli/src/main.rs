//! Kino Queue CLI - Headless playback queue simulator
//!
//! Features:
//! - Scripted playback scenarios against the in-memory engine
//! - Per-step queue, error and now-playing snapshots
//! - Tracker lifecycle dumps
//! - Player configuration checks

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod scenario;

/// Kino Queue CLI - Playback queue toolkit
#[derive(Parser)]
#[command(name = "kino-queue")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Playback queue simulation toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file (JSON)
    Simulate {
        /// Scenario file
        scenario: PathBuf,

        /// Player configuration file, overrides the scenario one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Time left to the session after each step (milliseconds)
        #[arg(long, default_value = "50")]
        settle_ms: u64,

        /// Print tracker events after the run
        #[arg(long)]
        trackers: bool,
    },

    /// Run the built-in demo scenario
    Demo {
        /// Time left to the session after each step (milliseconds)
        #[arg(long, default_value = "50")]
        settle_ms: u64,

        /// Print tracker events after the run
        #[arg(long)]
        trackers: bool,
    },

    /// Print the default configuration, or validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(short = 'i', long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    kino_queue::init();

    match cli.command {
        Commands::Simulate {
            scenario,
            config,
            settle_ms,
            trackers,
        } => {
            commands::simulate(&scenario, config, settle_ms, trackers, &cli.format).await?;
        }
        Commands::Demo {
            settle_ms,
            trackers,
        } => {
            commands::demo(settle_ms, trackers, &cli.format).await?;
        }
        Commands::Config { file } => {
            commands::config(file, &cli.format)?;
        }
    }

    Ok(())
}
