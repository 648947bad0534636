//! Current snapshot → processed snapshot, per tracked symbol.

use std::path::{Path, PathBuf};

use price_pipeline_models::progress::ProgressCallback;
use price_pipeline_models::{
    Category, PROCESSED_LABEL, RunSummary, SnapshotKey, Stage, Step, TrackedSymbol,
};
use price_pipeline_store::SnapshotStore;

use crate::{TransformError, codec, crypto, stock};

/// Transforms the current snapshot of one pair and replaces its processed
/// snapshot. Returns the number of rows written.
///
/// When `output_dir` is set, a copy of the CSV is also written to
/// `{output_dir}/{category}/{symbol}_processed.csv`. Failing to write that
/// copy is logged and does not fail the symbol.
///
/// # Errors
///
/// Returns [`TransformError`] if the current snapshot is missing or
/// malformed, or the processed upload fails.
pub async fn transform_symbol(
    store: &SnapshotStore,
    tracked: &TrackedSymbol,
    stock_interval: &str,
    output_dir: Option<&Path>,
) -> Result<u64, TransformError> {
    let snapshot = store
        .get(tracked.category, &tracked.symbol, Stage::Current)
        .await?;
    log::info!("Transforming {}", snapshot.key);

    let payload: serde_json::Value = serde_json::from_slice(&snapshot.payload)?;

    let (csv, rows) = match tracked.category {
        Category::Stock => {
            let records = stock::transform_stock(&tracked.symbol, &payload, stock_interval)?;
            (codec::encode_stocks(&records)?, records.len())
        }
        Category::Crypto => {
            let records = crypto::transform_crypto(&tracked.symbol, &payload)?;
            (codec::encode_crypto(&records)?, records.len())
        }
    };

    if let Some(dir) = output_dir {
        match write_local_copy(dir, tracked, &csv) {
            Ok(path) => log::debug!("Wrote {}", path.display()),
            Err(e) => log::warn!("{tracked}: {e}"),
        }
    }

    let key = store
        .put(
            tracked.category,
            &tracked.symbol,
            Stage::Processed,
            csv,
            PROCESSED_LABEL,
        )
        .await?;
    log::info!("{tracked}: {rows} rows -> {key}");

    Ok(rows as u64)
}

/// Transforms every symbol in order. One symbol's failure never stops the
/// others; each outcome is recorded in the returned summary.
pub async fn run_transform(
    store: &SnapshotStore,
    symbols: &[TrackedSymbol],
    stock_interval: &str,
    output_dir: Option<&Path>,
    progress: &dyn ProgressCallback,
) -> RunSummary {
    let mut summary = RunSummary::default();
    progress.set_total(symbols.len() as u64);

    for tracked in symbols {
        progress.set_message(format!("Transforming {tracked}"));
        match transform_symbol(store, tracked, stock_interval, output_dir).await {
            Ok(rows) => summary.record_success(Step::Transform, tracked, rows),
            Err(e) => {
                log::error!("Failed to transform {tracked}: {e}");
                summary.record_failure(Step::Transform, tracked, e.kind(), e.to_string());
            }
        }
        progress.inc(1);
    }

    log::info!("Transform finished: {summary}");
    progress.finish(format!("Transform: {summary}"));
    summary
}

fn write_local_copy(
    dir: &Path,
    tracked: &TrackedSymbol,
    csv: &[u8],
) -> Result<PathBuf, TransformError> {
    let dir = dir.join(tracked.category.to_string());
    let path = dir.join(SnapshotKey::processed(tracked.category, &tracked.symbol).file_name());

    std::fs::create_dir_all(&dir)
        .and_then(|()| std::fs::write(&path, csv))
        .map_err(|source| TransformError::Io {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use price_pipeline_config::RetryConfig;
    use price_pipeline_models::FailureKind;
    use price_pipeline_models::progress::NullProgress;
    use price_pipeline_store::memory::MemoryObjectStore;
    use serde_json::json;

    use super::*;

    fn store() -> (SnapshotStore, MemoryObjectStore) {
        let memory = MemoryObjectStore::new("test-bucket");
        let store = SnapshotStore::new(Arc::new(memory.clone()), RetryConfig::none());
        (store, memory)
    }

    async fn put_current(store: &SnapshotStore, tracked: &TrackedSymbol, payload: &serde_json::Value) {
        store
            .put(
                tracked.category,
                &tracked.symbol,
                Stage::Current,
                serde_json::to_vec_pretty(payload).unwrap(),
                "2024-01-01_09-30-00",
            )
            .await
            .unwrap();
    }

    fn aapl_payload() -> serde_json::Value {
        json!({
            "Meta Data": { "2. Symbol": "AAPL" },
            "Time Series (5min)": {
                "2024-01-01 09:30:00": {
                    "1. open": "100.0",
                    "2. high": "101.0",
                    "3. low": "99.0",
                    "4. close": "100.5",
                    "5. volume": "1000"
                }
            }
        })
    }

    #[tokio::test]
    async fn writes_processed_snapshot() {
        let (store, memory) = store();
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        put_current(&store, &aapl, &aapl_payload()).await;

        let rows = transform_symbol(&store, &aapl, "5min", None).await.unwrap();

        assert_eq!(rows, 1);
        let key = "processed/stocks/AAPL/AAPL_processed.csv";
        assert_eq!(memory.content_type(key).as_deref(), Some("text/csv"));
        let csv = String::from_utf8(memory.body(key).unwrap()).unwrap();
        assert!(csv.contains("AAPL,100.125,0.02"));
    }

    #[tokio::test]
    async fn rerun_replaces_processed_snapshot() {
        let (store, memory) = store();
        let btc = TrackedSymbol::new(Category::Crypto, "bitcoin");
        put_current(&store, &btc, &json!({ "prices": [[1_704_067_200_000_i64, 1.0]] })).await;
        transform_symbol(&store, &btc, "5min", None).await.unwrap();

        store.archive(Category::Crypto, "bitcoin", 10).await.unwrap();
        put_current(
            &store,
            &btc,
            &json!({ "prices": [[1_704_067_200_000_i64, 1.0], [1_704_067_500_000_i64, 2.0]] }),
        )
        .await;
        let rows = transform_symbol(&store, &btc, "5min", None).await.unwrap();

        assert_eq!(rows, 2);
        assert_eq!(
            memory.keys_with_prefix("processed/crypto/bitcoin/"),
            vec!["processed/crypto/bitcoin/bitcoin_processed.csv".to_string()]
        );
    }

    #[tokio::test]
    async fn failures_are_scoped_to_the_symbol() {
        let (store, memory) = store();
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        let msft = TrackedSymbol::new(Category::Stock, "MSFT");
        let eth = TrackedSymbol::new(Category::Crypto, "ethereum");
        put_current(&store, &aapl, &aapl_payload()).await;
        put_current(&store, &eth, &json!({ "error": "coin not found" })).await;

        let summary = run_transform(
            &store,
            &[msft.clone(), aapl.clone(), eth.clone()],
            "5min",
            None,
            &NullProgress,
        )
        .await;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        let kinds: Vec<_> = summary.failures().map(|(_, s, kind, _)| (s.clone(), kind)).collect();
        assert_eq!(
            kinds,
            vec![(msft, FailureKind::NotFound), (eth, FailureKind::SchemaMismatch)]
        );
        assert!(memory.body("processed/stocks/AAPL/AAPL_processed.csv").is_some());
    }

    #[tokio::test]
    async fn writes_local_copy() {
        let (store, _memory) = store();
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        put_current(&store, &aapl, &aapl_payload()).await;

        let dir = std::env::temp_dir().join(format!("price_pipeline_transform_{}", std::process::id()));
        transform_symbol(&store, &aapl, "5min", Some(&dir)).await.unwrap();

        let path = dir.join("stocks").join("AAPL_processed.csv");
        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(csv.starts_with("timestamp,open,high,low,close,volume,symbol,daily_avg,volatility\n"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn invalid_json_is_a_schema_mismatch() {
        let (store, _memory) = store();
        let msft = TrackedSymbol::new(Category::Stock, "MSFT");
        store
            .put(
                Category::Stock,
                "MSFT",
                Stage::Current,
                b"<html>".to_vec(),
                "2024-01-01_09-30-00",
            )
            .await
            .unwrap();

        let err = transform_symbol(&store, &msft, "5min", None).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::SchemaMismatch);
    }
}
