//! `DuckDB` sink tables.
//!
//! Both tables are append-only; every load adds rows.

use std::path::Path;

use duckdb::Connection;

use crate::LoadError;
use crate::rows::{CryptoRow, StockRow};

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 2_000;

/// Opens (or creates) the sink database and ensures the schema exists.
///
/// # Errors
///
/// Returns [`LoadError`] if the directory, connection, or schema creation
/// fails.
pub fn open(path: &Path) -> Result<Connection, LoadError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    log::debug!("Opened sink database {}", path.display());

    Ok(conn)
}

/// Opens an in-memory sink with the schema created.
///
/// # Errors
///
/// Returns [`LoadError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, LoadError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), LoadError> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS stocks (
            "timestamp" TIMESTAMP NOT NULL,
            open DOUBLE NOT NULL,
            high DOUBLE NOT NULL,
            low DOUBLE NOT NULL,
            close DOUBLE NOT NULL,
            volume BIGINT NOT NULL,
            symbol TEXT NOT NULL,
            daily_avg DOUBLE NOT NULL,
            volatility DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS crypto (
            "timestamp" TIMESTAMP NOT NULL,
            price DOUBLE NOT NULL,
            symbol TEXT NOT NULL,
            rolling_avg_1h DOUBLE,
            volatility DOUBLE
        );"#,
    )?;

    Ok(())
}

/// Runs `f` inside a transaction, committing on success and rolling back
/// on any error.
///
/// # Errors
///
/// Returns the error from `f`, or [`LoadError::DuckDb`] if the transaction
/// cannot be started or committed.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, LoadError>,
) -> Result<T, LoadError> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

/// Appends stock rows in one transaction. Returns the number of rows
/// inserted.
///
/// # Errors
///
/// Returns [`LoadError::DuckDb`] if any chunk fails; nothing is inserted
/// in that case.
pub fn insert_stocks(conn: &Connection, rows: &[StockRow]) -> Result<u64, LoadError> {
    insert_stocks_chunked(conn, rows, CHUNK_SIZE)
}

/// Appends crypto rows in one transaction. Returns the number of rows
/// inserted.
///
/// # Errors
///
/// Returns [`LoadError::DuckDb`] if any chunk fails; nothing is inserted
/// in that case.
pub fn insert_crypto(conn: &Connection, rows: &[CryptoRow]) -> Result<u64, LoadError> {
    insert_crypto_chunked(conn, rows, CHUNK_SIZE)
}

fn insert_stocks_chunked(
    conn: &Connection,
    rows: &[StockRow],
    chunk_size: usize,
) -> Result<u64, LoadError> {
    if rows.is_empty() {
        return Ok(0);
    }

    in_transaction(conn, |conn| {
        let mut total_inserted = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let sql = insert_sql(
                r#"INSERT INTO stocks ("timestamp", open, high, low, close, volume, symbol, daily_avg, volatility) VALUES "#,
                "(CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?)",
                chunk.len(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut param_idx = 1usize;

            for row in chunk {
                stmt.raw_bind_parameter(param_idx, &row.timestamp)?;
                stmt.raw_bind_parameter(param_idx + 1, row.open)?;
                stmt.raw_bind_parameter(param_idx + 2, row.high)?;
                stmt.raw_bind_parameter(param_idx + 3, row.low)?;
                stmt.raw_bind_parameter(param_idx + 4, row.close)?;
                stmt.raw_bind_parameter(param_idx + 5, row.volume)?;
                stmt.raw_bind_parameter(param_idx + 6, &row.symbol)?;
                stmt.raw_bind_parameter(param_idx + 7, row.daily_avg)?;
                stmt.raw_bind_parameter(param_idx + 8, row.volatility)?;
                param_idx += 9;
            }

            let inserted = stmt.raw_execute()?;
            total_inserted += u64::try_from(inserted).unwrap_or(0);
        }

        Ok(total_inserted)
    })
}

fn insert_crypto_chunked(
    conn: &Connection,
    rows: &[CryptoRow],
    chunk_size: usize,
) -> Result<u64, LoadError> {
    if rows.is_empty() {
        return Ok(0);
    }

    in_transaction(conn, |conn| {
        let mut total_inserted = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let sql = insert_sql(
                r#"INSERT INTO crypto ("timestamp", price, symbol, rolling_avg_1h, volatility) VALUES "#,
                "(CAST(? AS TIMESTAMP), ?, ?, ?, ?)",
                chunk.len(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut param_idx = 1usize;

            for row in chunk {
                stmt.raw_bind_parameter(param_idx, &row.timestamp)?;
                stmt.raw_bind_parameter(param_idx + 1, row.price)?;
                stmt.raw_bind_parameter(param_idx + 2, &row.symbol)?;
                stmt.raw_bind_parameter(param_idx + 3, row.rolling_avg_1h)?;
                stmt.raw_bind_parameter(param_idx + 4, row.volatility)?;
                param_idx += 5;
            }

            let inserted = stmt.raw_execute()?;
            total_inserted += u64::try_from(inserted).unwrap_or(0);
        }

        Ok(total_inserted)
    })
}

fn insert_sql(prefix: &str, placeholders: &str, rows: usize) -> String {
    let mut sql = String::with_capacity(prefix.len() + rows * (placeholders.len() + 2));
    sql.push_str(prefix);
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(placeholders);
    }
    sql
}

/// Number of rows in `table`.
///
/// # Errors
///
/// Returns [`LoadError::DuckDb`] if the query fails.
pub fn row_count(conn: &Connection, table: &str) -> Result<u64, LoadError> {
    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(timestamp: &str, volume: i64) -> StockRow {
        StockRow {
            timestamp: timestamp.to_string(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume,
            symbol: "AAPL".to_string(),
            daily_avg: 100.125,
            volatility: 0.02,
        }
    }

    fn crypto(timestamp: &str, rolling_avg_1h: Option<f64>) -> CryptoRow {
        CryptoRow {
            timestamp: timestamp.to_string(),
            price: 42_000.5,
            symbol: "bitcoin".to_string(),
            rolling_avg_1h,
            volatility: None,
        }
    }

    #[test]
    fn appends_stock_rows() {
        let conn = open_in_memory().unwrap();
        let rows = vec![stock("2024-01-01 09:30:00", 1000), stock("2024-01-01 09:35:00", 2000)];

        assert_eq!(insert_stocks(&conn, &rows).unwrap(), 2);
        assert_eq!(insert_stocks(&conn, &rows).unwrap(), 2);
        assert_eq!(row_count(&conn, "stocks").unwrap(), 4);

        let volume: i64 = conn
            .query_row("SELECT SUM(volume) FROM stocks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(volume, 6000);
    }

    #[test]
    fn stores_crypto_nulls() {
        let conn = open_in_memory().unwrap();
        let rows = vec![
            crypto("2024-01-01 00:00:00.000", None),
            crypto("2024-01-01 00:05:00.000", Some(42_000.0)),
        ];

        insert_crypto(&conn, &rows).unwrap();

        let nulls: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM crypto WHERE rolling_avg_1h IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn non_finite_values_are_stored() {
        let conn = open_in_memory().unwrap();
        let mut row = stock("2024-01-01 09:30:00", 1);
        row.volatility = f64::INFINITY;

        insert_stocks(&conn, &[row]).unwrap();

        let volatility: f64 = conn
            .query_row("SELECT volatility FROM stocks", [], |row| row.get(0))
            .unwrap();
        assert!(volatility.is_infinite());
    }

    #[test]
    fn failing_row_rolls_back_earlier_chunks() {
        let conn = open_in_memory().unwrap();
        let rows = vec![
            stock("2024-01-01 09:30:00", 1),
            stock("2024-01-01 09:35:00", 2),
            stock("not a timestamp", 3),
        ];

        let err = insert_stocks_chunked(&conn, &rows, 1).unwrap_err();

        assert!(matches!(err, LoadError::DuckDb(_)));
        assert_eq!(row_count(&conn, "stocks").unwrap(), 0);
    }

    #[test]
    fn crypto_rollback_leaves_table_usable() {
        let conn = open_in_memory().unwrap();
        let bad = vec![crypto("2024-01-01 00:00:00.000", None), crypto("garbage", None)];

        assert!(insert_crypto_chunked(&conn, &bad, 1).is_err());
        assert_eq!(row_count(&conn, "crypto").unwrap(), 0);

        insert_crypto(&conn, &[crypto("2024-01-01 00:10:00.000", None)]).unwrap();
        assert_eq!(row_count(&conn, "crypto").unwrap(), 1);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let conn = open_in_memory().unwrap();
        assert_eq!(insert_stocks(&conn, &[]).unwrap(), 0);
        assert_eq!(insert_crypto(&conn, &[]).unwrap(), 0);
    }
}
