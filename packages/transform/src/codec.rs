//! Processed CSV encoding.
//!
//! The header row is always written, even for an empty snapshot, so the
//! loader can validate columns regardless of row count. `None` values
//! become empty cells.

use price_pipeline_models::{CRYPTO_COLUMNS, CryptoRecord, STOCK_COLUMNS, StockRecord};
use serde::Serialize;

use crate::TransformError;

/// Encodes records as CSV with the given header row.
///
/// `columns` must list the record's fields in declaration order.
///
/// # Errors
///
/// Returns [`TransformError::Csv`] if serialization fails.
pub fn encode<T: Serialize>(records: &[T], columns: &[&str]) -> Result<Vec<u8>, TransformError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(columns)?;
    for record in records {
        writer.serialize(record)?;
    }

    writer
        .into_inner()
        .map_err(|e| TransformError::Csv(e.into_error().into()))
}

/// Encodes processed stock rows.
///
/// # Errors
///
/// Returns [`TransformError::Csv`] if serialization fails.
pub fn encode_stocks(records: &[StockRecord]) -> Result<Vec<u8>, TransformError> {
    encode(records, STOCK_COLUMNS)
}

/// Encodes processed crypto rows.
///
/// # Errors
///
/// Returns [`TransformError::Csv`] if serialization fails.
pub fn encode_crypto(records: &[CryptoRecord]) -> Result<Vec<u8>, TransformError> {
    encode(records, CRYPTO_COLUMNS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn stock_csv_has_expected_columns() {
        let csv = text(
            encode_stocks(&[StockRecord {
                timestamp: "2024-01-01 09:30:00".to_string(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1000.0,
                symbol: "AAPL".to_string(),
                daily_avg: 100.125,
                volatility: 0.02,
            }])
            .unwrap(),
        );

        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,open,high,low,close,volume,symbol,daily_avg,volatility")
        );
        assert_eq!(
            lines.next(),
            Some("2024-01-01 09:30:00,100.0,101.0,99.0,100.5,1000.0,AAPL,100.125,0.02")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn crypto_nulls_are_empty_cells() {
        let csv = text(
            encode_crypto(&[CryptoRecord {
                timestamp_ms: 1_704_067_200_000,
                price: 42_000.5,
                timestamp: "2024-01-01 00:00:00.000".to_string(),
                symbol: "bitcoin".to_string(),
                rolling_avg_1h: None,
                volatility: None,
            }])
            .unwrap(),
        );

        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp_ms,price,timestamp,symbol,rolling_avg_1h,volatility")
        );
        assert_eq!(
            lines.next(),
            Some("1704067200000,42000.5,2024-01-01 00:00:00.000,bitcoin,,")
        );
    }

    #[test]
    fn empty_snapshot_still_has_header() {
        let csv = text(encode_crypto(&[]).unwrap());
        assert_eq!(
            csv,
            "timestamp_ms,price,timestamp,symbol,rolling_avg_1h,volatility\n"
        );
    }

    #[test]
    fn non_finite_values_survive_encoding() {
        let csv = text(
            encode_stocks(&[StockRecord {
                timestamp: "t".to_string(),
                open: 0.0,
                high: 1.0,
                low: 0.0,
                close: 0.5,
                volume: 1.0,
                symbol: "ZERO".to_string(),
                daily_avg: 0.375,
                volatility: f64::INFINITY,
            }])
            .unwrap(),
        );

        let row = csv.lines().nth(1).unwrap();
        let volatility: f64 = row.rsplit(',').next().unwrap().parse().unwrap();
        assert!(volatility.is_infinite());
    }
}
