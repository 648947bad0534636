#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line orchestrator for the price pipeline.
//!
//! Each step can be run on its own or chained with `run`. Without a
//! subcommand an interactive menu picks the steps.
//!
//! Uses `indicatif-log-bridge` (via [`price_pipeline_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dialoguer::{MultiSelect, Select};
use price_pipeline_cli_utils::init_logger;
use price_pipeline_config::{IngestMode, PipelineConfig};
use price_pipeline_models::Category;
use price_pipeline_source::HttpSource;
use price_pipeline_store::SnapshotStore;
use price_pipeline_store::s3::S3ObjectStore;

use crate::pipeline::{Pipeline, PipelineStep};

#[derive(Parser)]
#[command(name = "price_pipeline", about = "Stock and crypto price snapshot pipeline")]
struct Cli {
    /// TOML configuration file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, transform, and load every tracked symbol
    Run,
    /// Archive the previous snapshots and fetch fresh ones
    Ingest {
        /// Override the configured ingest mode (`strict` or `legacy`)
        #[arg(long)]
        mode: Option<IngestMode>,
    },
    /// Turn current snapshots into processed CSVs
    Transform,
    /// Load processed CSVs into the database
    Load,
    /// Archive the current snapshots of one symbol and apply retention
    Archive {
        /// `stocks` or `crypto`
        category: Category,
        symbol: String,
        /// Override the configured number of archived snapshots kept
        #[arg(long)]
        max_archives: Option<usize>,
    },
    /// List the current and archived snapshots of one symbol
    List {
        /// `stocks` or `crypto`
        category: Category,
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };

    let store = S3ObjectStore::snapshot_store(&config).await;

    let steps = match cli.command {
        Some(Commands::Archive {
            category,
            symbol,
            max_archives,
        }) => {
            let max_archives = max_archives.unwrap_or(config.max_archives);
            return archive(&store, category, &symbol, max_archives).await;
        }
        Some(Commands::List { category, symbol }) => {
            return list(&store, category, &symbol).await;
        }
        Some(Commands::Run) => PipelineStep::ALL.to_vec(),
        Some(Commands::Ingest { mode }) => {
            if let Some(mode) = mode {
                config.ingest_mode = mode;
            }
            vec![PipelineStep::Ingest]
        }
        Some(Commands::Transform) => vec![PipelineStep::Transform],
        Some(Commands::Load) => vec![PipelineStep::Load],
        None => select_steps()?,
    };

    let source = HttpSource::new(config.sources.clone())?;
    let pipeline = Pipeline::new(config, store, Box::new(source), multi);
    let summary = pipeline.run(&steps).await?;

    if summary.failed() > 0 {
        return Err(format!("{} symbol step(s) failed", summary.failed()).into());
    }

    Ok(())
}

async fn archive(
    store: &SnapshotStore,
    category: Category,
    symbol: &str,
    max_archives: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let symbol = category.normalize_symbol(symbol);
    let report = store.archive(category, &symbol, max_archives).await?;

    println!(
        "{category}/{symbol}: moved {}, copies skipped {}, evicted {}",
        report.moved.len(),
        report.copies_skipped,
        report.evicted.len()
    );
    for key in &report.evicted {
        println!("  evicted {key}");
    }

    Ok(())
}

async fn list(
    store: &SnapshotStore,
    category: Category,
    symbol: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let symbol = category.normalize_symbol(symbol);

    println!("Current:");
    for key in store.list_current(category, &symbol).await? {
        println!("  {key}");
    }

    println!("Archived (newest first):");
    for meta in store.list_archived(category, &symbol).await? {
        let modified = meta
            .last_modified
            .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
        println!("  {:<60} {modified}", meta.key);
    }

    Ok(())
}

/// Prompts for the steps to run. Defaults to all of them.
fn select_steps() -> Result<Vec<PipelineStep>, Box<dyn std::error::Error>> {
    println!("Price Pipeline");
    println!();

    let items = &["Run full pipeline", "Choose steps"];
    let mode = Select::new()
        .with_prompt("What would you like to do?")
        .items(items)
        .default(0)
        .interact()?;

    if mode == 0 {
        return Ok(PipelineStep::ALL.to_vec());
    }

    let labels: Vec<&str> = PipelineStep::ALL.iter().map(|s| s.label()).collect();
    let defaults = vec![true; labels.len()];
    let selected = MultiSelect::new()
        .with_prompt("Pipeline steps (space=toggle, a=all, enter=confirm)")
        .items(&labels)
        .defaults(&defaults)
        .interact()?;

    if selected.is_empty() {
        return Err("No steps selected".into());
    }

    Ok(selected.into_iter().map(|i| PipelineStep::ALL[i]).collect())
}
