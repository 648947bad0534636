#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration for the price pipeline.
//!
//! A [`PipelineConfig`] is loaded once at process start, either from the
//! environment ([`PipelineConfig::from_env`]) or from a TOML file
//! ([`PipelineConfig::load`]), and passed to every component.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `S3_BUCKET` | `stock-pipeline-data` | Bucket holding every snapshot |
//! | `S3_REGION` | `us-east-2` | Bucket region |
//! | `S3_ENDPOINT_URL` | unset | Endpoint override for S3-compatible stores |
//! | `STOCK_API_KEY` | unset | Alpha Vantage API key |
//! | `STOCK_INTERVAL` | `5min` | Intraday series interval |
//! | `STOCK_SYMBOLS` | `AAPL,MSFT` | Comma-separated tickers |
//! | `CRYPTO_SYMBOLS` | `bitcoin,ethereum` | Comma-separated `CoinGecko` ids |
//! | `MAX_ARCHIVES` | `10` | Archived snapshots kept per symbol |
//! | `SCRATCH_DIR` | `temp_data` | Local scratch dir, wiped every ingest run |
//! | `OUTPUT_DIR` | `processed_data` | Local copy of processed CSVs |
//! | `DATABASE_PATH` | `data/prices.duckdb` | `DuckDB` sink file |
//! | `STORAGE_RETRY_ATTEMPTS` | `3` | Attempts per transient storage failure |
//! | `STORAGE_RETRY_BASE_DELAY_MS` | `500` | Backoff base, doubled per attempt |
//! | `INGEST_MODE` | `strict` | `strict` or `legacy` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use price_pipeline_models::{Category, TrackedSymbol};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value was present but could not be used.
    #[error("Invalid configuration value for {name}: {message}")]
    Invalid {
        /// Variable or field name.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`PipelineConfig`].
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// How the ingestion driver treats remote-source failures.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IngestMode {
    /// Validate payloads and record failures per symbol; siblings continue.
    #[default]
    Strict,
    /// Fetch once without retry, store whatever JSON came back whatever the
    /// HTTP status, and abort the run on the first error. Kept for
    /// compatibility testing against older runs.
    Legacy,
}

/// Object-storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Endpoint override (`MinIO`, R2, localstack). Enables path-style
    /// addressing when set.
    pub endpoint_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "stock-pipeline-data".to_string(),
            region: "us-east-2".to_string(),
            endpoint_url: None,
        }
    }
}

/// Remote data source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub stock_api_key: Option<String>,
    pub stock_interval: String,
    pub stock_base_url: String,
    pub crypto_base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stock_api_key: None,
            stock_interval: "5min".to_string(),
            stock_base_url: "https://www.alphavantage.co/query".to_string(),
            crypto_base_url: "https://api.coingecko.com/api/v3".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryConfig {
    /// No retries and no delay.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base…
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// Everything a pipeline run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub sources: SourceConfig,
    pub stock_symbols: Vec<String>,
    pub crypto_symbols: Vec<String>,
    /// Archived snapshots retained per (category, symbol).
    pub max_archives: usize,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub retry: RetryConfig,
    pub ingest_mode: IngestMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            sources: SourceConfig::default(),
            stock_symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            crypto_symbols: vec!["bitcoin".to_string(), "ethereum".to_string()],
            max_archives: 10,
            scratch_dir: PathBuf::from("temp_data"),
            output_dir: PathBuf::from("processed_data"),
            database_path: PathBuf::from("data/prices.duckdb"),
            retry: RetryConfig::default(),
            ingest_mode: IngestMode::Strict,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed or
    /// the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable lookup. Unset
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed or
    /// the resulting configuration fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(bucket) = get("S3_BUCKET") {
            config.storage.bucket = bucket;
        }
        if let Some(region) = get("S3_REGION") {
            config.storage.region = region;
        }
        config.storage.endpoint_url = get("S3_ENDPOINT_URL");

        config.sources.stock_api_key = get("STOCK_API_KEY");
        if let Some(interval) = get("STOCK_INTERVAL") {
            config.sources.stock_interval = interval;
        }

        if let Some(list) = get("STOCK_SYMBOLS") {
            config.stock_symbols = split_list(&list);
        }
        if let Some(list) = get("CRYPTO_SYMBOLS") {
            config.crypto_symbols = split_list(&list);
        }

        if let Some(value) = get("MAX_ARCHIVES") {
            config.max_archives = parse_var("MAX_ARCHIVES", &value)?;
        }
        if let Some(dir) = get("SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(value) = get("STORAGE_RETRY_ATTEMPTS") {
            config.retry.max_attempts = parse_var("STORAGE_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("STORAGE_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay_ms = parse_var("STORAGE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = get("INGEST_MODE") {
            config.ingest_mode = parse_var("INGEST_MODE", &value)?;
        }

        config.validate()
    }

    /// Loads configuration from a TOML file. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML or fails
    /// validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    /// Normalizes symbol casing and rejects unusable values.
    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.storage.bucket.trim().is_empty() {
            return Err(invalid("storage.bucket", "must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }

        self.stock_symbols = normalize(Category::Stock, &self.stock_symbols);
        self.crypto_symbols = normalize(Category::Crypto, &self.crypto_symbols);

        if self.stock_symbols.is_empty() && self.crypto_symbols.is_empty() {
            return Err(invalid(
                "stock_symbols/crypto_symbols",
                "at least one symbol must be tracked",
            ));
        }

        if self.sources.stock_api_key.is_none() && !self.stock_symbols.is_empty() {
            log::warn!("STOCK_API_KEY is not set; stock fetches will be rejected upstream");
        }

        Ok(self)
    }

    /// Every tracked pair in fixed processing order: stocks first, then
    /// crypto, each in configured order.
    #[must_use]
    pub fn tracked_symbols(&self) -> Vec<TrackedSymbol> {
        self.stock_symbols
            .iter()
            .map(|s| TrackedSymbol::new(Category::Stock, s))
            .chain(
                self.crypto_symbols
                    .iter()
                    .map(|s| TrackedSymbol::new(Category::Crypto, s)),
            )
            .collect()
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',').map(str::to_string).collect()
}

fn normalize(category: Category, symbols: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = category.normalize_symbol(symbol);
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| invalid(name, e.to_string()))
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        message: message.into(),
    }
}
