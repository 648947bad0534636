//! Intraday stock bars → [`StockRecord`]s.

use price_pipeline_models::StockRecord;
use serde_json::Value;

use crate::TransformError;

/// Source field names of one intraday bar, in `open, high, low, close,
/// volume` order.
const BAR_FIELDS: [&str; 5] = ["1. open", "2. high", "3. low", "4. close", "5. volume"];

/// Converts an intraday time-series payload into one record per bar,
/// ordered by timestamp ascending.
///
/// `interval` selects the series object (`Time Series ({interval})`).
///
/// # Errors
///
/// Returns [`TransformError::Shape`] if the series object is missing or a
/// bar field is absent or not numeric.
pub fn transform_stock(
    symbol: &str,
    payload: &Value,
    interval: &str,
) -> Result<Vec<StockRecord>, TransformError> {
    let series_name = format!("Time Series ({interval})");
    let series = payload
        .get(&series_name)
        .and_then(Value::as_object)
        .ok_or_else(|| TransformError::shape(format!("missing \"{series_name}\" object")))?;

    let mut records = series
        .iter()
        .map(|(timestamp, bar)| stock_row(symbol, timestamp, bar))
        .collect::<Result<Vec<_>, _>>()?;
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    Ok(records)
}

fn stock_row(symbol: &str, timestamp: &str, bar: &Value) -> Result<StockRecord, TransformError> {
    let [open, high, low, close, volume] = BAR_FIELDS.map(|name| bar_field(timestamp, bar, name));
    let (open, high, low, close, volume) = (open?, high?, low?, close?, volume?);

    Ok(StockRecord {
        timestamp: timestamp.to_string(),
        open,
        high,
        low,
        close,
        volume,
        symbol: symbol.to_string(),
        daily_avg: (open + high + low + close) / 4.0,
        volatility: (high - low) / open,
    })
}

/// Reads one numeric bar field. The API sends numbers as strings.
fn bar_field(timestamp: &str, bar: &Value, name: &str) -> Result<f64, TransformError> {
    match bar.get(name) {
        Some(Value::String(text)) => text.trim().parse().map_err(|e| {
            TransformError::shape(format!("{timestamp}: \"{name}\" = {text:?} ({e})"))
        }),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| TransformError::shape(format!("{timestamp}: \"{name}\" out of range"))),
        Some(other) => Err(TransformError::shape(format!(
            "{timestamp}: \"{name}\" is not numeric: {other}"
        ))),
        None => Err(TransformError::shape(format!("{timestamp}: missing \"{name}\""))),
    }
}
