//! Alpha Vantage intraday time series.
//!
//! Alpha Vantage answers rate limits and bad symbols with HTTP 200 and a
//! JSON body carrying `Error Message`, `Note`, or `Information` instead of
//! the series, so a successful request is not enough to trust the payload.

use price_pipeline_config::SourceConfig;

use crate::SourceError;

/// Keys Alpha Vantage uses for error and throttling notices.
const NOTICE_KEYS: &[&str] = &["Error Message", "Note", "Information"];

/// Name of the series object for an interval, e.g. `Time Series (5min)`.
#[must_use]
pub fn series_key(interval: &str) -> String {
    format!("Time Series ({interval})")
}

/// Builds the `TIME_SERIES_INTRADAY` request for a ticker.
#[must_use]
pub fn intraday_request(
    client: &reqwest::Client,
    config: &SourceConfig,
    symbol: &str,
) -> reqwest::RequestBuilder {
    client.get(&config.stock_base_url).query(&[
        ("function", "TIME_SERIES_INTRADAY"),
        ("symbol", symbol),
        ("interval", config.stock_interval.as_str()),
        ("apikey", config.stock_api_key.as_deref().unwrap_or_default()),
    ])
}

/// Checks that a payload carries the intraday series.
///
/// # Errors
///
/// Returns [`SourceError::Payload`] if the payload is an Alpha Vantage
/// notice or lacks the series object.
pub fn check_payload(payload: &serde_json::Value, interval: &str) -> Result<(), SourceError> {
    for key in NOTICE_KEYS {
        if let Some(notice) = payload.get(*key) {
            return Err(SourceError::Payload {
                message: format!("{key}: {}", notice.as_str().unwrap_or_default()),
            });
        }
    }

    let series = series_key(interval);
    match payload.get(&series) {
        Some(serde_json::Value::Object(_)) => Ok(()),
        Some(_) => Err(SourceError::Payload {
            message: format!("\"{series}\" is not an object"),
        }),
        None => Err(SourceError::Payload {
            message: format!("missing \"{series}\""),
        }),
    }
}
