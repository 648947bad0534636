#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Remote price sources.
//!
//! Each source returns the raw JSON document for one symbol; the pipeline
//! stores it as-is. [`HttpSource`] talks to the public endpoints:
//!
//! - stocks: Alpha Vantage `TIME_SERIES_INTRADAY` (requires an API key)
//! - crypto: `CoinGecko` `coins/{id}/market_chart` (no key)

pub mod alpha_vantage;
pub mod coingecko;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use price_pipeline_config::SourceConfig;
use price_pipeline_models::{Category, FailureKind};

/// Errors that can occur during data source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Request URL (API key redacted).
        url: String,
        /// Response status code.
        status: u16,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source answered with an error document or an unexpected shape.
    #[error("Unusable payload: {message}")]
    Payload {
        /// Description of what went wrong.
        message: String,
    },
}

impl SourceError {
    /// Failure classification for run summaries.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        FailureKind::SourceUnavailable
    }
}

/// Producer of raw JSON snapshots.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches the current raw document for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails after retries or the
    /// body is not JSON.
    async fn fetch(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<serde_json::Value, SourceError>;

    /// Fetches `symbol` once and returns whatever JSON document the server
    /// sent, whatever the HTTP status. No retries and no status check, so
    /// error payloads are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request cannot be sent or the body is
    /// not JSON.
    async fn fetch_unchecked(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<serde_json::Value, SourceError>;

    /// Checks that a fetched document is a usable snapshot rather than an
    /// error or rate-limit notice.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Payload`] describing the problem.
    fn validate(&self, category: Category, payload: &serde_json::Value) -> Result<(), SourceError>;
}

/// [`RemoteSource`] backed by the public HTTP APIs.
pub struct HttpSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl HttpSource {
    /// Builds an HTTP client with the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the client cannot be constructed.
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn request(&self, category: Category, symbol: &str) -> reqwest::RequestBuilder {
        match category {
            Category::Stock => alpha_vantage::intraday_request(&self.client, &self.config, symbol),
            Category::Crypto => coingecko::market_chart_request(&self.client, &self.config, symbol),
        }
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<serde_json::Value, SourceError> {
        log::info!("Fetching {category}/{symbol}");
        retry::send_json(|| self.request(category, symbol)).await
    }

    async fn fetch_unchecked(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<serde_json::Value, SourceError> {
        log::info!("Fetching {category}/{symbol} (single attempt)");
        retry::send_json_once(|| self.request(category, symbol)).await
    }

    fn validate(&self, category: Category, payload: &serde_json::Value) -> Result<(), SourceError> {
        match category {
            Category::Stock => {
                alpha_vantage::check_payload(payload, &self.config.stock_interval)
            }
            Category::Crypto => coingecko::check_payload(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requests_per_category() {
        let source = HttpSource::new(SourceConfig {
            stock_api_key: Some("demo".to_string()),
            ..SourceConfig::default()
        })
        .unwrap();

        let stock = source.request(Category::Stock, "AAPL").build().unwrap();
        assert!(stock.url().as_str().starts_with("https://www.alphavantage.co/query?"));

        let crypto = source.request(Category::Crypto, "bitcoin").build().unwrap();
        assert!(
            crypto
                .url()
                .as_str()
                .starts_with("https://api.coingecko.com/api/v3/coins/bitcoin/market_chart?")
        );
    }

    #[test]
    fn validates_by_category() {
        let source = HttpSource::new(SourceConfig::default()).unwrap();
        let chart = serde_json::json!({ "prices": [[1_704_067_200_000_i64, 42_000.0]] });
        assert!(source.validate(Category::Crypto, &chart).is_ok());
        assert!(source.validate(Category::Stock, &chart).is_err());
    }
}
