//! CLI entry point for geo-timeseries
//!
//! Every subcommand runs one pipeline stage against the archive named in the
//! configuration, or the whole cycle:
//!
//! ```bash
//! geo-timeseries --config config/pipeline.toml run
//! geo-timeseries --config config/pipeline.toml watch
//! geo-timeseries --config config/pipeline.toml inspect
//! ```
//!
//! Configuration values can be overridden with `GEO_TS_` environment
//! variables, e.g. `GEO_TS_SOLVER__TIMEOUT="30m"`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geo_timeseries::config::PipelineConfig;
use geo_timeseries::logging;
use geo_timeseries::Orchestrator;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "geo-timeseries")]
#[command(about = "Geoelectrical monitoring time-series pipeline", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = "config/pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new snapshot directories into the raw store
    Ingest {
        /// Ingest only this snapshot directory
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Rebuild the filtered store from the raw store
    Filter,
    /// Write solver input files for dates not inverted yet
    Export,
    /// Run the solver on every pending batch manifest
    Invert,
    /// Fold new solver results into the inverted stores
    Assimilate,
    /// Write CSV tables of every store
    Csv,
    /// Run every stage once
    Run,
    /// Run a cycle whenever a new snapshot arrives
    Watch,
    /// Print a JSON summary of the archive
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(config = %cli.config.display(), "configuration loaded");

    let orchestrator = Orchestrator::from_config(config)?;

    match cli.command {
        Commands::Ingest { snapshot } => {
            let mut archive = orchestrator.load()?;
            let report = orchestrator.ingest(&mut archive, snapshot.as_deref())?;
            if !report.is_noop() {
                orchestrator.save(&archive)?;
            }
            println!(
                "ingested {} new dates ({} already present, {} ghost measurements)",
                report.new_dates.len(),
                report.already_present,
                report.ghost_measurements
            );
        }
        Commands::Filter => {
            let mut archive = orchestrator.load()?;
            let dates = orchestrator.filter(&mut archive)?;
            orchestrator.save(&archive)?;
            println!("filtered store holds {dates} dates");
        }
        Commands::Export => {
            let archive = orchestrator.load()?;
            let summary = orchestrator.export(&archive)?;
            for batch in &summary.batches {
                println!(
                    "{} task {}: {} written, {} skipped",
                    batch.family,
                    batch.task_id,
                    batch.written.len(),
                    batch.skipped
                );
            }
            for (family, task_id, e) in &summary.failures {
                eprintln!("{family} task {task_id}: {e}");
            }
            if let Some((family, task_id, e)) = summary.failures.into_iter().next() {
                return Err(e).with_context(|| format!("exporting {family} task {task_id}"));
            }
        }
        Commands::Invert => {
            let (done, failed) = orchestrator.invert().await;
            println!("{} batches inverted, {} failed", done.len(), failed.len());
            if let Some((manifest, e)) = failed.into_iter().next() {
                return Err(e).with_context(|| format!("inverting {}", manifest.display()));
            }
        }
        Commands::Assimilate => {
            let mut archive = orchestrator.load()?;
            let mut changed = false;
            for &task_id in &orchestrator.config().survey.task_ids {
                let report = orchestrator.assimilate(&mut archive, task_id)?;
                changed |= !report.new_dates.is_empty();
                println!("task {task_id}: {} new results", report.new_dates.len());
            }
            if changed {
                orchestrator.save(&archive)?;
            }
        }
        Commands::Csv => {
            let archive = orchestrator.load()?;
            let report = orchestrator.write_csv(&archive)?;
            println!(
                "wrote {} raw, {} filtered and {} inverted rows",
                report.raw_rows, report.filtered_rows, report.inverted_rows
            );
        }
        Commands::Run => {
            let report = orchestrator.run_cycle().await?;
            println!(
                "cycle complete: {} exported, {} inverted, {} errors",
                report.exported_files(),
                report.inverted.len(),
                report.errors.len()
            );
            for error in &report.errors {
                eprintln!("  {error}");
            }
        }
        Commands::Watch => {
            tokio::select! {
                result = orchestrator.watch() => result?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
        Commands::Inspect => {
            let archive = orchestrator.load()?;
            println!("{}", serde_json::to_string_pretty(&archive.summary())?);
        }
    }
    Ok(())
}
