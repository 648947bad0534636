//! Processed CSV → sink rows.
//!
//! Columns are located by header name, so extra columns are ignored and
//! column order does not matter. A missing sink column is fatal for the
//! whole snapshot.

use csv::StringRecord;
use price_pipeline_models::{CRYPTO_SINK_COLUMNS, STOCK_COLUMNS};

use crate::LoadError;

/// Volumes at or beyond this magnitude do not fit the `BIGINT` column.
const MAX_VOLUME: f64 = 9.2e18;

/// One row of the `stocks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StockRow {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub symbol: String,
    pub daily_avg: f64,
    pub volatility: f64,
}

/// One row of the `crypto` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CryptoRow {
    pub timestamp: String,
    pub price: f64,
    pub symbol: String,
    pub rolling_avg_1h: Option<f64>,
    pub volatility: Option<f64>,
}

/// Parses a processed stock CSV. `volume` is truncated to an integer.
///
/// # Errors
///
/// Returns [`LoadError::MissingColumn`] if a sink column is absent,
/// [`LoadError::InvalidValue`] for unparseable or non-finite cells, and
/// [`LoadError::Csv`] for malformed CSV.
pub fn parse_stocks(csv: &[u8]) -> Result<Vec<StockRow>, LoadError> {
    read_projected(csv, STOCK_COLUMNS, |cells| {
        Ok(StockRow {
            timestamp: cells.text(0),
            open: cells.float(1)?,
            high: cells.float(2)?,
            low: cells.float(3)?,
            close: cells.float(4)?,
            volume: cells.volume(5)?,
            symbol: cells.text(6),
            daily_avg: cells.float(7)?,
            volatility: cells.float(8)?,
        })
    })
}

/// Parses a processed crypto CSV, keeping only the sink columns. Empty
/// cells in the nullable columns become `None`.
///
/// # Errors
///
/// Returns [`LoadError::MissingColumn`] if a sink column is absent,
/// [`LoadError::InvalidValue`] for unparseable cells, and
/// [`LoadError::Csv`] for malformed CSV.
pub fn parse_crypto(csv: &[u8]) -> Result<Vec<CryptoRow>, LoadError> {
    read_projected(csv, CRYPTO_SINK_COLUMNS, |cells| {
        Ok(CryptoRow {
            timestamp: cells.text(0),
            price: cells.float(1)?,
            symbol: cells.text(2),
            rolling_avg_1h: cells.optional_float(3)?,
            volatility: cells.optional_float(4)?,
        })
    })
}

fn read_projected<T>(
    csv: &[u8],
    columns: &[&str],
    mut parse_row: impl FnMut(&Cells<'_>) -> Result<T, LoadError>,
) -> Result<Vec<T>, LoadError> {
    let mut reader = csv::Reader::from_reader(csv);
    let indexes = project(reader.headers()?, columns)?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(parse_row(&Cells {
            record: &record,
            indexes: &indexes,
            columns,
            row: i + 1,
        })?);
    }

    Ok(rows)
}

/// Header position of each sink column, in sink column order.
fn project(headers: &StringRecord, columns: &[&str]) -> Result<Vec<usize>, LoadError> {
    columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h.trim() == *column)
                .ok_or_else(|| LoadError::MissingColumn {
                    column: (*column).to_string(),
                })
        })
        .collect()
}

/// One data row viewed through the sink column projection.
struct Cells<'a> {
    record: &'a StringRecord,
    indexes: &'a [usize],
    columns: &'a [&'a str],
    row: usize,
}

impl Cells<'_> {
    fn raw(&self, column: usize) -> &str {
        self.record.get(self.indexes[column]).unwrap_or("").trim()
    }

    fn invalid(&self, column: usize) -> LoadError {
        LoadError::InvalidValue {
            row: self.row,
            column: self.columns[column].to_string(),
            value: self.raw(column).to_string(),
        }
    }

    fn text(&self, column: usize) -> String {
        self.raw(column).to_string()
    }

    fn float(&self, column: usize) -> Result<f64, LoadError> {
        self.raw(column).parse().map_err(|_| self.invalid(column))
    }

    fn optional_float(&self, column: usize) -> Result<Option<f64>, LoadError> {
        if self.raw(column).is_empty() {
            return Ok(None);
        }
        self.float(column).map(Some)
    }

    fn volume(&self, column: usize) -> Result<i64, LoadError> {
        let value = self.float(column)?;
        if !value.is_finite() || value.abs() >= MAX_VOLUME {
            return Err(self.invalid(column));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(value.trunc() as i64)
    }
}
