#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Snapshot, storage key, record, and run summary types for the price
//! pipeline.
//!
//! Every object the pipeline writes to the bucket is addressed by a
//! [`SnapshotKey`]:
//!
//! | Stage | Key |
//! |---|---|
//! | current | `stocks/AAPL/AAPL_2024-01-01_09-30-00.json` |
//! | archived | `archived/stocks/AAPL/AAPL_2024-01-01_09-30-00.json` |
//! | processed | `processed/stocks/AAPL/AAPL_processed.csv` |

pub mod progress;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// `strftime` format of the `captured_at` label embedded in snapshot keys.
///
/// Lexicographic order of the formatted strings matches chronological order.
pub const CAPTURED_AT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Label used in place of `captured_at` for processed snapshots, which are
/// overwritten on every run instead of versioned.
pub const PROCESSED_LABEL: &str = "processed";

/// Column order of the processed stock CSV.
pub const STOCK_COLUMNS: &[&str] = &[
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "symbol",
    "daily_avg",
    "volatility",
];

/// Column order of the processed crypto CSV.
pub const CRYPTO_COLUMNS: &[&str] = &[
    "timestamp_ms",
    "price",
    "timestamp",
    "symbol",
    "rolling_avg_1h",
    "volatility",
];

/// Columns of the `crypto` sink table, in insertion order.
pub const CRYPTO_SINK_COLUMNS: &[&str] = &[
    "timestamp",
    "price",
    "symbol",
    "rolling_avg_1h",
    "volatility",
];

/// Asset class of a tracked symbol.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Category {
    /// Equities fetched from the intraday time-series endpoint.
    #[serde(rename = "stocks", alias = "stock")]
    #[strum(to_string = "stocks", serialize = "stock")]
    Stock,
    /// Crypto assets fetched from the market-chart endpoint.
    #[serde(rename = "crypto")]
    #[strum(to_string = "crypto")]
    Crypto,
}

impl Category {
    /// Name of the relational sink table this category loads into.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Stock => "stocks",
            Self::Crypto => "crypto",
        }
    }

    /// Normalizes a symbol to the casing the remote sources expect:
    /// tickers are upper-case, crypto asset ids lower-case.
    #[must_use]
    pub fn normalize_symbol(self, symbol: &str) -> String {
        let symbol = symbol.trim();
        match self {
            Self::Stock => symbol.to_ascii_uppercase(),
            Self::Crypto => symbol.to_ascii_lowercase(),
        }
    }
}

/// Lifecycle stage of a snapshot. Determines the key prefix and extension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// The live raw snapshot for a pair. At most one per pair.
    Current,
    /// Retained historical raw snapshots.
    Archived,
    /// Metric-enriched CSV derived from the current raw snapshot.
    Processed,
}

impl Stage {
    /// Key prefix for this stage. Current snapshots live at the bucket
    /// root under their category.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Current => "",
            Self::Archived => "archived",
            Self::Processed => "processed",
        }
    }

    /// File extension of objects in this stage.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Current | Self::Archived => "json",
            Self::Processed => "csv",
        }
    }

    /// Content type used when uploading objects in this stage.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Current | Self::Archived => "application/json",
            Self::Processed => "text/csv",
        }
    }
}

/// Returns the key prefix (with trailing `/`) holding every object of a
/// pair in the given stage, e.g. `archived/stocks/AAPL/`.
#[must_use]
pub fn pair_prefix(stage: Stage, category: Category, symbol: &str) -> String {
    match stage.prefix() {
        "" => format!("{category}/{symbol}/"),
        prefix => format!("{prefix}/{category}/{symbol}/"),
    }
}

/// Formats a capture time as the sortable label embedded in keys.
#[must_use]
pub fn format_captured_at(at: DateTime<Utc>) -> String {
    at.format(CAPTURED_AT_FORMAT).to_string()
}

/// Deterministic address of one snapshot in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub stage: Stage,
    pub category: Category,
    pub symbol: String,
    /// Sortable capture label, or [`PROCESSED_LABEL`] for processed keys.
    pub captured_at: String,
}

impl SnapshotKey {
    #[must_use]
    pub fn new(
        stage: Stage,
        category: Category,
        symbol: impl Into<String>,
        captured_at: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            category,
            symbol: symbol.into(),
            captured_at: captured_at.into(),
        }
    }

    /// The single, unversioned processed key for a pair.
    #[must_use]
    pub fn processed(category: Category, symbol: impl Into<String>) -> Self {
        Self::new(Stage::Processed, category, symbol, PROCESSED_LABEL)
    }

    /// `{symbol}_{captured_at}.{ext}`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.symbol,
            self.captured_at,
            self.stage.extension()
        )
    }

    /// Full object key.
    #[must_use]
    pub fn to_key(&self) -> String {
        format!(
            "{}{}",
            pair_prefix(self.stage, self.category, &self.symbol),
            self.file_name()
        )
    }

    /// Same snapshot, different stage. The capture label is kept, so an
    /// archived copy keeps its original timestamped file name.
    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Parses an object key back into its parts.
    ///
    /// Returns `None` for keys that do not follow the
    /// `{prefix}/{category}/{symbol}/{symbol}_{label}.{ext}` layout.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        let (stage, rest) = match parts.as_slice() {
            [category, symbol, file] => (Stage::Current, [*category, *symbol, *file]),
            ["archived", category, symbol, file] => {
                (Stage::Archived, [*category, *symbol, *file])
            }
            ["processed", category, symbol, file] => {
                (Stage::Processed, [*category, *symbol, *file])
            }
            _ => return None,
        };
        let [category, symbol, file] = rest;

        let category: Category = category.parse().ok()?;
        let stem = file.strip_suffix(&format!(".{}", stage.extension()))?;
        let captured_at = stem.strip_prefix(symbol)?.strip_prefix('_')?;
        if captured_at.is_empty() {
            return None;
        }

        Some(Self::new(stage, category, symbol, captured_at))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// One (category, symbol) pair the pipeline tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedSymbol {
    pub category: Category,
    pub symbol: String,
}

impl TrackedSymbol {
    #[must_use]
    pub fn new(category: Category, symbol: &str) -> Self {
        Self {
            category,
            symbol: category.normalize_symbol(symbol),
        }
    }
}

impl fmt::Display for TrackedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.symbol)
    }
}

/// A snapshot read from or written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub key: SnapshotKey,
    /// Raw JSON bytes (current/archived) or CSV bytes (processed).
    pub payload: Vec<u8>,
}

/// One row of the processed stock CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Kept as floating point until load time, where it is cast to an
    /// integer.
    pub volume: f64,
    pub symbol: String,
    pub daily_avg: f64,
    /// `(high - low) / open`. Non-finite when `open` is zero.
    pub volatility: f64,
}

/// One row of the processed crypto CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoRecord {
    pub timestamp_ms: i64,
    pub price: f64,
    pub timestamp: String,
    pub symbol: String,
    /// Trailing 12-sample mean. `None` until 12 samples are available.
    pub rolling_avg_1h: Option<f64>,
    /// Fractional change from the previous sample. `None` on the first row.
    pub volatility: Option<f64>,
}

/// Pipeline step a [`SymbolOutcome`] belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Ingest,
    Transform,
    Load,
}

/// Classification of a symbol-scoped failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The remote data source failed, timed out, or returned an error
    /// payload.
    SourceUnavailable,
    /// An object-storage call failed.
    StorageFailure,
    /// An expected object was missing at read time.
    NotFound,
    /// A snapshot did not have the expected shape or columns.
    SchemaMismatch,
    /// The bulk insert failed and was rolled back.
    SinkFailure,
    /// Local scratch or output I/O failed.
    LocalIo,
}

/// Result of one step for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub step: Step,
    pub symbol: TrackedSymbol,
    /// `Ok(rows or objects written)` or `Err((kind, message))`.
    pub result: Result<u64, (FailureKind, String)>,
}

/// Aggregate of every [`SymbolOutcome`] in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcomes: Vec<SymbolOutcome>,
}

impl RunSummary {
    pub fn record_success(&mut self, step: Step, symbol: &TrackedSymbol, count: u64) {
        self.outcomes.push(SymbolOutcome {
            step,
            symbol: symbol.clone(),
            result: Ok(count),
        });
    }

    pub fn record_failure(
        &mut self,
        step: Step,
        symbol: &TrackedSymbol,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.outcomes.push(SymbolOutcome {
            step,
            symbol: symbol.clone(),
            result: Err((kind, message.into())),
        });
    }

    /// Appends every outcome of `other`.
    pub fn merge(&mut self, other: Self) {
        self.outcomes.extend(other.outcomes);
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Whether `symbol` failed in any step.
    #[must_use]
    pub fn has_failed(&self, symbol: &TrackedSymbol) -> bool {
        self.outcomes
            .iter()
            .any(|o| &o.symbol == symbol && o.result.is_err())
    }

    /// Iterates over failed outcomes as `(step, symbol, kind, message)`.
    pub fn failures(&self) -> impl Iterator<Item = (Step, &TrackedSymbol, FailureKind, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err((kind, message)) => Some((o.step, &o.symbol, *kind, message.as_str())),
        })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded(), self.failed())
    }
}
