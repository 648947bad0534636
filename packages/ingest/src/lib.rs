#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion driver.
//!
//! For each tracked pair, in order: archive the previous current snapshot,
//! fetch a fresh document from the remote source, and store it as the new
//! current snapshot. Every snapshot written in one run shares the run's
//! `captured_at` label.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use price_pipeline_config::{IngestMode, PipelineConfig};
use price_pipeline_models::progress::ProgressCallback;
use price_pipeline_models::{
    FailureKind, RunSummary, SnapshotKey, Stage, Step, TrackedSymbol, format_captured_at,
};
use price_pipeline_source::{RemoteSource, SourceError};
use price_pipeline_store::{SnapshotStore, StoreError};

/// Errors that can occur during ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Archiving or uploading failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote source failed or returned an unusable payload.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The payload could not be re-encoded.
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// The local scratch directory could not be reset.
    #[error("Failed to reset scratch directory {path}: {source}")]
    Scratch {
        /// Scratch directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl IngestError {
    /// Failure classification for run summaries.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Source(e) => e.kind(),
            Self::Json(_) => FailureKind::SchemaMismatch,
            Self::Scratch { .. } => FailureKind::LocalIo,
        }
    }
}

/// Settings for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Archived snapshots kept per pair.
    pub max_archives: usize,
    /// Local directory receiving a copy of every fetched payload. Wiped at
    /// the start of each run.
    pub scratch_dir: PathBuf,
    pub mode: IngestMode,
    /// Label shared by every snapshot written in this run.
    pub captured_at: String,
}

impl IngestSettings {
    /// Settings for a run started at `started_at`.
    #[must_use]
    pub fn from_config(config: &PipelineConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            max_archives: config.max_archives,
            scratch_dir: config.scratch_dir.clone(),
            mode: config.ingest_mode,
            captured_at: format_captured_at(started_at),
        }
    }
}

/// Runs one ingestion pass over `symbols`.
///
/// In [`IngestMode::Strict`] each symbol's failure is recorded in the
/// returned summary and the remaining symbols still run. In
/// [`IngestMode::Legacy`] each symbol is fetched once with no retry, the
/// JSON body is stored unvalidated even for error statuses, and the first
/// failure aborts the run.
///
/// # Errors
///
/// Returns [`IngestError::Scratch`] if the scratch directory cannot be
/// reset, or, in legacy mode, the first symbol failure.
pub async fn run_ingest(
    store: &SnapshotStore,
    source: &dyn RemoteSource,
    settings: &IngestSettings,
    symbols: &[TrackedSymbol],
    progress: &dyn ProgressCallback,
) -> Result<RunSummary, IngestError> {
    reset_scratch_dir(&settings.scratch_dir)?;

    log::info!(
        "Ingesting {} symbol(s) as {} ({} mode, keeping {} archives)",
        symbols.len(),
        settings.captured_at,
        settings.mode,
        settings.max_archives,
    );

    let mut summary = RunSummary::default();
    progress.set_total(symbols.len() as u64);

    for tracked in symbols {
        progress.set_message(format!("Ingesting {tracked}"));

        match ingest_symbol(store, source, settings, tracked).await {
            Ok(key) => {
                log::info!("{tracked}: stored {key}");
                summary.record_success(Step::Ingest, tracked, 1);
            }
            Err(e) if settings.mode == IngestMode::Legacy => {
                log::error!("Failed to ingest {tracked}, aborting run: {e}");
                progress.finish(format!("Ingest aborted at {tracked}"));
                return Err(e);
            }
            Err(e) => {
                log::error!("Failed to ingest {tracked}: {e}");
                summary.record_failure(Step::Ingest, tracked, e.kind(), e.to_string());
            }
        }

        progress.inc(1);
    }

    log::info!("Ingest finished: {summary}");
    progress.finish(format!("Ingest: {summary}"));
    Ok(summary)
}

/// Archives, fetches, and stores one pair. Returns the new current key.
///
/// # Errors
///
/// Returns [`IngestError`] from the first failing step. A failed fetch
/// leaves the pair with no current snapshot, since archiving runs first.
pub async fn ingest_symbol(
    store: &SnapshotStore,
    source: &dyn RemoteSource,
    settings: &IngestSettings,
    tracked: &TrackedSymbol,
) -> Result<SnapshotKey, IngestError> {
    let TrackedSymbol { category, symbol } = tracked;

    let report = store.archive(*category, symbol, settings.max_archives).await?;
    if !report.is_noop() {
        log::info!(
            "{tracked}: archived {} snapshot(s), evicted {}",
            report.moved.len(),
            report.evicted.len()
        );
    }

    let payload = match settings.mode {
        IngestMode::Strict => {
            let payload = source.fetch(*category, symbol).await?;
            source.validate(*category, &payload)?;
            payload
        }
        IngestMode::Legacy => source.fetch_unchecked(*category, symbol).await?,
    };
    let body = serde_json::to_vec_pretty(&payload)?;

    let key = SnapshotKey::new(
        Stage::Current,
        *category,
        symbol.as_str(),
        settings.captured_at.as_str(),
    );
    write_scratch_copy(&settings.scratch_dir, &key, &body);

    Ok(store
        .put(*category, symbol, Stage::Current, body, &settings.captured_at)
        .await?)
}

/// Removes everything under `dir` and recreates it empty.
fn reset_scratch_dir(dir: &Path) -> Result<(), IngestError> {
    let scratch_error = |source: std::io::Error| IngestError::Scratch {
        path: dir.to_path_buf(),
        source,
    };

    match std::fs::remove_dir_all(dir) {
        Ok(()) => log::debug!("Cleared scratch directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(scratch_error(e)),
    }

    std::fs::create_dir_all(dir).map_err(scratch_error)
}

/// Local copies are for inspection only; failing to write one is logged.
fn write_scratch_copy(dir: &Path, key: &SnapshotKey, body: &[u8]) {
    let path = dir.join(key.file_name());
    if let Err(e) = std::fs::write(&path, body) {
        log::warn!("Failed to write scratch copy {}: {e}", path.display());
    }
}
