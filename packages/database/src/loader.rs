//! Processed snapshot → sink table, per tracked symbol.

use duckdb::Connection;
use price_pipeline_models::progress::ProgressCallback;
use price_pipeline_models::{Category, RunSummary, Stage, Step, TrackedSymbol};
use price_pipeline_store::SnapshotStore;

use crate::{LoadError, rows, sink};

/// Loads the processed snapshot of one pair into its sink table. Returns
/// the number of rows inserted.
///
/// # Errors
///
/// Returns [`LoadError`] if the processed snapshot is missing or
/// malformed, or the insert fails (in which case nothing is inserted).
#[allow(clippy::future_not_send)]
pub async fn load_symbol(
    store: &SnapshotStore,
    conn: &Connection,
    tracked: &TrackedSymbol,
) -> Result<u64, LoadError> {
    let snapshot = store
        .get(tracked.category, &tracked.symbol, Stage::Processed)
        .await?;
    log::info!("Loading {} into {}", snapshot.key, tracked.category.table());

    let inserted = match tracked.category {
        Category::Stock => sink::insert_stocks(conn, &rows::parse_stocks(&snapshot.payload)?)?,
        Category::Crypto => sink::insert_crypto(conn, &rows::parse_crypto(&snapshot.payload)?)?,
    };

    log::info!(
        "Inserted {inserted} rows into {} for {tracked}",
        tracked.category.table()
    );
    Ok(inserted)
}

/// Loads every symbol in order. One symbol's failure never stops the
/// others; each outcome is recorded in the returned summary.
#[allow(clippy::future_not_send)]
pub async fn run_load(
    store: &SnapshotStore,
    conn: &Connection,
    symbols: &[TrackedSymbol],
    progress: &dyn ProgressCallback,
) -> RunSummary {
    let mut summary = RunSummary::default();
    progress.set_total(symbols.len() as u64);

    for tracked in symbols {
        progress.set_message(format!("Loading {tracked}"));
        match load_symbol(store, conn, tracked).await {
            Ok(rows) => summary.record_success(Step::Load, tracked, rows),
            Err(e) => {
                log::error!("Failed to load {tracked}: {e}");
                summary.record_failure(Step::Load, tracked, e.kind(), e.to_string());
            }
        }
        progress.inc(1);
    }

    log::info!("Load finished: {summary}");
    progress.finish(format!("Load: {summary}"));
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use price_pipeline_config::RetryConfig;
    use price_pipeline_models::FailureKind;
    use price_pipeline_models::progress::NullProgress;
    use price_pipeline_store::memory::MemoryObjectStore;

    use super::*;

    fn store() -> SnapshotStore {
        SnapshotStore::new(
            Arc::new(MemoryObjectStore::new("test-bucket")),
            RetryConfig::none(),
        )
    }

    async fn put_processed(store: &SnapshotStore, tracked: &TrackedSymbol, csv: &str) {
        store
            .put(
                tracked.category,
                &tracked.symbol,
                Stage::Processed,
                csv.as_bytes().to_vec(),
                "",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn loads_one_row_per_processed_row() {
        let store = store();
        let conn = sink::open_in_memory().unwrap();
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        put_processed(
            &store,
            &aapl,
            "timestamp,open,high,low,close,volume,symbol,daily_avg,volatility\n\
             2024-01-01 09:30:00,100.0,101.0,99.0,100.5,1000.0,AAPL,100.125,0.02\n\
             2024-01-01 09:35:00,100.5,102.0,100.0,101.0,1500.0,AAPL,100.875,0.0199\n",
        )
        .await;

        assert_eq!(load_symbol(&store, &conn, &aapl).await.unwrap(), 2);
        assert_eq!(sink::row_count(&conn, "stocks").unwrap(), 2);
    }

    #[tokio::test]
    async fn crypto_extra_columns_are_dropped() {
        let store = store();
        let conn = sink::open_in_memory().unwrap();
        let btc = TrackedSymbol::new(Category::Crypto, "bitcoin");
        put_processed(
            &store,
            &btc,
            "timestamp_ms,price,timestamp,symbol,rolling_avg_1h,volatility\n\
             1704067200000,42000.5,2024-01-01 00:00:00.000,bitcoin,,\n",
        )
        .await;

        assert_eq!(load_symbol(&store, &conn, &btc).await.unwrap(), 1);
        let symbol: String = conn
            .query_row("SELECT symbol FROM crypto", [], |row| row.get(0))
            .unwrap();
        assert_eq!(symbol, "bitcoin");
    }

    #[tokio::test]
    async fn failures_are_scoped_to_the_symbol() {
        let store = store();
        let conn = sink::open_in_memory().unwrap();
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        let msft = TrackedSymbol::new(Category::Stock, "MSFT");
        let eth = TrackedSymbol::new(Category::Crypto, "ethereum");
        let btc = TrackedSymbol::new(Category::Crypto, "bitcoin");

        put_processed(
            &store,
            &aapl,
            "timestamp,open,high,low,close,volume,symbol,daily_avg,volatility\n\
             2024-01-01 09:30:00,1,1,1,1,1,AAPL,1,0\n\
             not a timestamp,1,1,1,1,1,AAPL,1,0\n",
        )
        .await;
        put_processed(
            &store,
            &eth,
            "timestamp_ms,price,timestamp,symbol\n1704067200000,1.0,2024-01-01 00:00:00.000,ethereum\n",
        )
        .await;
        put_processed(
            &store,
            &btc,
            "timestamp_ms,price,timestamp,symbol,rolling_avg_1h,volatility\n\
             1704067200000,42000.5,2024-01-01 00:00:00.000,bitcoin,,\n",
        )
        .await;

        let summary = run_load(
            &store,
            &conn,
            &[aapl.clone(), msft.clone(), eth.clone(), btc],
            &NullProgress,
        )
        .await;

        assert_eq!(summary.succeeded(), 1);
        let kinds: Vec<_> = summary
            .failures()
            .map(|(step, symbol, kind, _)| (step, symbol.clone(), kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (Step::Load, aapl, FailureKind::SinkFailure),
                (Step::Load, msft, FailureKind::NotFound),
                (Step::Load, eth, FailureKind::SchemaMismatch),
            ]
        );
        assert_eq!(sink::row_count(&conn, "stocks").unwrap(), 0);
        assert_eq!(sink::row_count(&conn, "crypto").unwrap(), 1);
    }
}
