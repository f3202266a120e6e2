//! `gait-kinetics` binary: runs a batch of trials and writes the step table.
//!
//! # Usage
//!
//! ```bash
//! gait-kinetics --input batch.json --output steps.jsonl
//! gait-kinetics --input batch.json --config gait.json --log-level debug
//! ```
//!
//! Rows go to stdout when `--output` is absent; logs always go to stderr.

use std::path::PathBuf;

use clap::Parser;
use gait_kinetics::export::{export_rows, BatchSummary, RowExporter};
use gait_kinetics::pipeline::{load_batch, BatchReport, GaitPipeline, PipelineConfig};
use tracing::{error, info, warn};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "gait-kinetics",
    version,
    about = "Gait events, braking/propulsion impulses and step tables",
    long_about = None
)]
struct Args {
    /// JSON array of trials.
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// JSON pipeline configuration. Defaults are used when absent.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Destination of the JSON-lines step table.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Override the startup exclusion of the segmenter, in seconds.
    #[arg(long, value_name = "SECONDS")]
    startup_exclusion_s: Option<f64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("gait-kinetics v{}", gait_kinetics::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match PipelineConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => PipelineConfig::default(),
    };

    if let Some(seconds) = args.startup_exclusion_s {
        config.segmenter.startup_exclusion_s = seconds;
    }
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    let trials = match load_batch(&args.input) {
        Ok(trials) => trials,
        Err(e) => {
            error!("Failed to load batch: {e}");
            std::process::exit(1);
        }
    };
    info!("Loaded {} trials from {}", trials.len(), args.input.display());

    let report = GaitPipeline::new(config).run_batch(&trials);

    let summary = match args.output.as_deref() {
        Some(path) => export_rows(path, &report),
        None => write_stdout(&report),
    };
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            error!("Failed to write step table: {e}");
            std::process::exit(1);
        }
    };

    info!(
        trials = summary.trials,
        rows = summary.rows,
        unmatched_rows = summary.unmatched_rows,
        ambiguous_joins = summary.ambiguous_joins,
        "batch written"
    );
    for trial in &summary.failed_trials {
        warn!(%trial, "trial produced no rows");
    }
    if summary.failed_trials.len() == summary.trials && summary.trials > 0 {
        std::process::exit(2);
    }
}

fn write_stdout(report: &BatchReport) -> gait_kinetics::Result<BatchSummary> {
    let stdout = std::io::stdout();
    let mut exporter = RowExporter::new(stdout.lock());
    for result in report.succeeded() {
        exporter.write_trial(result)?;
    }
    exporter.finish()?;
    Ok(BatchSummary::from_report(report))
}
