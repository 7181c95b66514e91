//! CLI command implementations

use crate::output::{format_json, format_table, OutputFormat};
use crate::scenario::{Scenario, Simulation, SimulationReport, DEMO_SCENARIO};
use anyhow::Context;
use console::style;
use kino_queue::PlayerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run a scenario file
pub async fn simulate(
    path: &Path,
    config: Option<PathBuf>,
    settle_ms: u64,
    trackers: bool,
    format: &str,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read scenario {}", path.display()))?;
    let mut scenario = Scenario::from_json(&content)?;
    if scenario.name.is_empty() {
        scenario.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    let config = match config {
        Some(path) => PlayerConfig::from_file(&path)
            .with_context(|| format!("Invalid configuration {}", path.display()))?,
        None => scenario.config.clone(),
    };

    run(scenario, config, settle_ms, trackers, format).await
}

/// Run the built-in demo scenario
pub async fn demo(settle_ms: u64, trackers: bool, format: &str) -> anyhow::Result<()> {
    let scenario = Scenario::from_json(DEMO_SCENARIO)?;
    let config = scenario.config.clone();
    run(scenario, config, settle_ms, trackers, format).await
}

async fn run(
    scenario: Scenario,
    config: PlayerConfig,
    settle_ms: u64,
    trackers: bool,
    format: &str,
) -> anyhow::Result<()> {
    let simulation = Simulation::start(&scenario, config, Duration::from_millis(settle_ms))?;
    let report = simulation
        .run(&scenario.name, &scenario.steps, trackers)
        .await?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", format_json(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("{} {}", style("Scenario:").bold(), report.name);
    println!("{}", format_table(&report.steps));

    if !report.tracker_events.is_empty() {
        println!("\n{}", style("Tracker events:").bold());
        for record in &report.tracker_events {
            println!("  {:>3}  {:?}", record.sequence, record.event);
        }
    }
}

/// Print the default configuration, or validate `file`
pub fn config(file: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let Some(path) = file else {
        println!("{}", PlayerConfig::default().to_json()?);
        return Ok(());
    };

    match PlayerConfig::from_file(&path) {
        Ok(config) => {
            match OutputFormat::from(format) {
                OutputFormat::Json => println!("{}", config.to_json()?),
                OutputFormat::Text => {
                    println!("{} {}", style("VALID").green().bold(), path.display());
                }
            }
            Ok(())
        }
        Err(e) => {
            println!("{} {}: {}", style("INVALID").red().bold(), path.display(), e);
            std::process::exit(1);
        }
    }
}
