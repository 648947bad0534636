#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Transforms raw snapshots into metric-enriched CSV.
//!
//! - Stocks: one row per intraday bar with `daily_avg` (mean of OHLC) and
//!   `volatility` (`(high - low) / open`).
//! - Crypto: one row per price sample with a trailing 12-sample mean
//!   (`rolling_avg_1h`, five-minute samples) and the fractional change from
//!   the previous sample (`volatility`).
//!
//! [`run_transform`] reads each pair's current snapshot from the
//! [`SnapshotStore`](price_pipeline_store::SnapshotStore) and replaces its
//! processed snapshot.

pub mod codec;
pub mod crypto;
pub mod runner;
pub mod stock;

use std::path::PathBuf;

use price_pipeline_models::FailureKind;
use price_pipeline_store::StoreError;

pub use runner::{run_transform, transform_symbol};

/// Errors that can occur while transforming a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Reading the raw snapshot or writing the processed one failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The raw snapshot is not valid JSON.
    #[error("Raw snapshot is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The raw snapshot is JSON but not in the expected shape.
    #[error("Unexpected snapshot shape: {message}")]
    Shape {
        /// Description of what is missing or malformed.
        message: String,
    },

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Writing a local copy failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl TransformError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    /// Failure classification for run summaries.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Json(_) | Self::Shape { .. } | Self::Csv(_) => FailureKind::SchemaMismatch,
            Self::Io { .. } => FailureKind::LocalIo,
        }
    }
}
