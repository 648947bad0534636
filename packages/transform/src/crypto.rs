//! Crypto market-chart price samples → [`CryptoRecord`]s.

use chrono::{DateTime, Utc};
use price_pipeline_models::CryptoRecord;
use serde_json::Value;

use crate::TransformError;

/// Samples in the trailing `rolling_avg_1h` window (five-minute samples).
pub const ROLLING_WINDOW: usize = 12;

/// Format of the calendar `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Converts a market-chart payload into one record per price sample, in
/// payload order.
///
/// # Errors
///
/// Returns [`TransformError::Shape`] if `prices` is missing or a sample is
/// not an `[epoch_ms, price]` pair.
pub fn transform_crypto(symbol: &str, payload: &Value) -> Result<Vec<CryptoRecord>, TransformError> {
    let prices = payload
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| TransformError::shape("missing \"prices\" array"))?;

    let samples = prices
        .iter()
        .enumerate()
        .map(|(index, sample)| price_sample(index, sample))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(samples.len());
    for (index, &(timestamp_ms, price)) in samples.iter().enumerate() {
        records.push(CryptoRecord {
            timestamp_ms,
            price,
            timestamp: format_timestamp(timestamp_ms)?,
            symbol: symbol.to_string(),
            rolling_avg_1h: rolling_mean(&samples, index),
            volatility: index
                .checked_sub(1)
                .map(|previous| (price - samples[previous].1) / samples[previous].1),
        });
    }

    Ok(records)
}

/// Mean price of the [`ROLLING_WINDOW`] samples ending at `index`, or
/// `None` while fewer samples are available.
fn rolling_mean(samples: &[(i64, f64)], index: usize) -> Option<f64> {
    if index + 1 < ROLLING_WINDOW {
        return None;
    }
    let window = &samples[index + 1 - ROLLING_WINDOW..=index];
    #[allow(clippy::cast_precision_loss)]
    let len = ROLLING_WINDOW as f64;
    Some(window.iter().map(|(_, price)| price).sum::<f64>() / len)
}

fn price_sample(index: usize, sample: &Value) -> Result<(i64, f64), TransformError> {
    let pair = match sample.as_array().map(Vec::as_slice) {
        Some([timestamp, price]) => (timestamp, price),
        _ => {
            return Err(TransformError::shape(format!(
                "prices[{index}] is not an [epoch_ms, price] pair"
            )));
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let timestamp_ms = pair
        .0
        .as_i64()
        .or_else(|| pair.0.as_f64().map(|ms| ms as i64))
        .ok_or_else(|| TransformError::shape(format!("prices[{index}][0] is not a number")))?;
    let price = pair
        .1
        .as_f64()
        .ok_or_else(|| TransformError::shape(format!("prices[{index}][1] is not a number")))?;

    Ok((timestamp_ms, price))
}

fn format_timestamp(timestamp_ms: i64) -> Result<String, TransformError> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .ok_or_else(|| TransformError::shape(format!("timestamp {timestamp_ms} out of range")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const START_MS: i64 = 1_704_067_200_000;
    const STEP_MS: i64 = 5 * 60 * 1000;

    fn chart(prices: &[f64]) -> Value {
        let samples: Vec<Value> = prices
            .iter()
            .zip(0..)
            .map(|(price, i)| json!([START_MS + i * STEP_MS, price]))
            .collect();
        json!({ "prices": samples, "market_caps": [], "total_volumes": [] })
    }

    #[test]
    fn fewer_than_window_samples_have_no_rolling_average() {
        let payload = chart(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        let records = transform_crypto("bitcoin", &payload).unwrap();

        assert_eq!(records.len(), 11);
        assert!(records.iter().all(|r| r.rolling_avg_1h.is_none()));
    }

    #[test]
    fn rolling_average_starts_at_twelfth_sample() {
        let prices: Vec<f64> = (1..=13).map(f64::from).collect();
        let records = transform_crypto("bitcoin", &chart(&prices)).unwrap();

        assert!(records[10].rolling_avg_1h.is_none());
        assert!((records[11].rolling_avg_1h.unwrap() - 6.5).abs() < 1e-12);
        assert!((records[12].rolling_avg_1h.unwrap() - 7.5).abs() < 1e-12);
    }

    #[test]
    fn volatility_is_change_from_previous_sample() {
        let records = transform_crypto("ethereum", &chart(&[100.0, 110.0, 99.0])).unwrap();

        assert_eq!(records[0].volatility, None);
        assert!((records[1].volatility.unwrap() - 0.1).abs() < 1e-12);
        assert!((records[2].volatility.unwrap() + 0.1).abs() < 1e-12);
    }

    #[test]
    fn converts_epoch_millis_to_calendar_time() {
        let payload = json!({ "prices": [[1_704_067_200_123_i64, 42_000.5]] });
        let records = transform_crypto("bitcoin", &payload).unwrap();

        assert_eq!(records[0].timestamp_ms, 1_704_067_200_123);
        assert_eq!(records[0].timestamp, "2024-01-01 00:00:00.123");
        assert_eq!(records[0].symbol, "bitcoin");
    }

    #[test]
    fn accepts_float_timestamps() {
        let payload = json!({ "prices": [[1_704_067_200_000.0, 1.0]] });
        let records = transform_crypto("bitcoin", &payload).unwrap();
        assert_eq!(records[0].timestamp_ms, START_MS);
    }

    #[test]
    fn missing_prices_is_a_shape_error() {
        let err = transform_crypto("bitcoin", &json!({ "error": "coin not found" })).unwrap_err();
        assert!(matches!(err, TransformError::Shape { .. }));
    }

    #[test]
    fn malformed_sample_is_a_shape_error() {
        let err = transform_crypto("bitcoin", &json!({ "prices": [[1, 2, 3]] })).unwrap_err();
        assert!(err.to_string().contains("prices[0]"));
    }
}
