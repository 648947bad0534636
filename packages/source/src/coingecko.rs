//! `CoinGecko` market chart (one day of USD prices).

use price_pipeline_config::SourceConfig;

use crate::SourceError;

/// Builds the `market_chart` request for a coin id.
#[must_use]
pub fn market_chart_request(
    client: &reqwest::Client,
    config: &SourceConfig,
    symbol: &str,
) -> reqwest::RequestBuilder {
    let base = config.crypto_base_url.trim_end_matches('/');
    client
        .get(format!("{base}/coins/{symbol}/market_chart"))
        .query(&[("vs_currency", "usd"), ("days", "1")])
}

/// Checks that a payload carries a `prices` array.
///
/// # Errors
///
/// Returns [`SourceError::Payload`] for `CoinGecko` error documents or
/// payloads without `prices`.
pub fn check_payload(payload: &serde_json::Value) -> Result<(), SourceError> {
    if let Some(error) = payload.get("error") {
        return Err(SourceError::Payload {
            message: format!("error: {error}"),
        });
    }
    if let Some(message) = payload.pointer("/status/error_message") {
        return Err(SourceError::Payload {
            message: format!("status: {message}"),
        });
    }

    match payload.get("prices") {
        Some(serde_json::Value::Array(_)) => Ok(()),
        Some(_) => Err(SourceError::Payload {
            message: "\"prices\" is not an array".to_string(),
        }),
        None => Err(SourceError::Payload {
            message: "missing \"prices\"".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_price_series() {
        let payload = serde_json::json!({
            "prices": [[1_704_067_200_000_i64, 42_000.5]],
            "market_caps": [],
            "total_volumes": []
        });
        assert!(check_payload(&payload).is_ok());
    }

    #[test]
    fn rejects_unknown_coin() {
        let payload = serde_json::json!({ "error": "coin not found" });
        assert!(check_payload(&payload).is_err());
    }

    #[test]
    fn rejects_rate_limit_status() {
        let payload = serde_json::json!({
            "status": { "error_code": 429, "error_message": "You've exceeded the Rate Limit." }
        });
        assert!(check_payload(&payload).is_err());
    }

    #[test]
    fn builds_market_chart_url() {
        let client = reqwest::Client::new();
        let config = SourceConfig {
            crypto_base_url: "https://example.test/api/v3/".to_string(),
            ..SourceConfig::default()
        };
        let request = market_chart_request(&client, &config, "ethereum")
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://example.test/api/v3/coins/ethereum/market_chart?vs_currency=usd&days=1"
        );
    }
}
