#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Relational sink for processed price snapshots.
//!
//! Processed CSVs are read from the snapshot store, projected onto the
//! sink columns, and appended to the `stocks` or `crypto` `DuckDB` table.
//! Each symbol's rows go in one transaction: any failing row rolls back
//! the whole batch for that symbol.

pub mod loader;
pub mod rows;
pub mod sink;

use price_pipeline_models::FailureKind;
use price_pipeline_store::StoreError;

pub use loader::{load_symbol, run_load};

/// Errors that can occur while loading a processed snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Reading the processed snapshot failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The processed CSV could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A sink column is missing from the processed CSV header.
    #[error("Processed CSV has no \"{column}\" column")]
    MissingColumn {
        /// Name of the missing column.
        column: String,
    },

    /// A cell could not be converted to the sink column type.
    #[error("Row {row}: invalid {column} value {value:?}")]
    InvalidValue {
        /// 1-based data row number (header excluded).
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },

    /// `DuckDB` error. The symbol's batch was rolled back.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Creating the database directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Failure classification for run summaries.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Csv(_) | Self::MissingColumn { .. } | Self::InvalidValue { .. } => {
                FailureKind::SchemaMismatch
            }
            Self::DuckDb(_) => FailureKind::SinkFailure,
            Self::Io(_) => FailureKind::LocalIo,
        }
    }
}
