#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the snapshot ingestion step.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use clap::Parser;
use price_pipeline_cli_utils::{IndicatifProgress, init_logger, print_summary};
use price_pipeline_config::{IngestMode, PipelineConfig};
use price_pipeline_ingest::{IngestSettings, run_ingest};
use price_pipeline_source::HttpSource;
use price_pipeline_store::s3::S3ObjectStore;

#[derive(Parser)]
#[command(
    name = "price_pipeline_ingest",
    about = "Fetch fresh price snapshots into the snapshot store"
)]
struct Cli {
    /// TOML configuration file. Environment variables are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured ingest mode (`strict` or `legacy`)
    #[arg(long)]
    mode: Option<IngestMode>,
    /// Override the number of archived snapshots kept per symbol
    #[arg(long)]
    max_archives: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(mode) = cli.mode {
        config.ingest_mode = mode;
    }
    if let Some(max_archives) = cli.max_archives {
        config.max_archives = max_archives;
    }

    let start = Instant::now();
    let store = S3ObjectStore::snapshot_store(&config).await;
    let source = HttpSource::new(config.sources.clone())?;
    let settings = IngestSettings::from_config(&config, Utc::now());
    let symbols = config.tracked_symbols();

    let progress = IndicatifProgress::steps_bar(&multi, "Ingest");
    let summary = run_ingest(&store, &source, &settings, &symbols, progress.as_ref()).await?;

    print_summary("Ingest", &summary);
    log::info!("Ingestion finished in {:.1}s", start.elapsed().as_secs_f64());

    if summary.failed() > 0 {
        return Err(format!("{} symbol(s) failed to ingest", summary.failed()).into());
    }

    Ok(())
}
