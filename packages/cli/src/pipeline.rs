//! Step orchestration shared by the subcommands and the interactive menu.
//!
//! A full run chains ingest -> transform -> load. A symbol that fails one
//! step is left out of the later steps, so a stale processed snapshot from
//! an earlier run is never loaded a second time.

use std::time::Instant;

use chrono::Utc;
use price_pipeline_cli_utils::{IndicatifProgress, MultiProgress, print_summary};
use price_pipeline_config::PipelineConfig;
use price_pipeline_database::{run_load, sink};
use price_pipeline_ingest::{IngestSettings, run_ingest};
use price_pipeline_models::{RunSummary, TrackedSymbol};
use price_pipeline_source::RemoteSource;
use price_pipeline_store::SnapshotStore;
use price_pipeline_transform::run_transform;

/// Steps available in the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Ingest,
    Transform,
    Load,
}

impl PipelineStep {
    pub const ALL: &[Self] = &[Self::Ingest, Self::Transform, Self::Load];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ingest => "Ingest fresh snapshots",
            Self::Transform => "Transform to processed CSV",
            Self::Load => "Load into the database",
        }
    }
}

/// Everything a step needs: configuration, the snapshot store, the remote
/// source, and the progress display.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub store: SnapshotStore,
    source: Box<dyn RemoteSource>,
    multi: MultiProgress,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        store: SnapshotStore,
        source: Box<dyn RemoteSource>,
        multi: MultiProgress,
    ) -> Self {
        Self {
            config,
            store,
            source,
            multi,
        }
    }

    /// Runs ingestion over `symbols`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be reset, or on the
    /// first symbol failure in legacy mode.
    pub async fn ingest(
        &self,
        symbols: &[TrackedSymbol],
    ) -> Result<RunSummary, Box<dyn std::error::Error>> {
        let settings = IngestSettings::from_config(&self.config, Utc::now());
        let progress = IndicatifProgress::steps_bar(&self.multi, "Ingest");
        Ok(run_ingest(
            &self.store,
            self.source.as_ref(),
            &settings,
            symbols,
            progress.as_ref(),
        )
        .await?)
    }

    /// Transforms the current snapshot of each symbol.
    pub async fn transform(&self, symbols: &[TrackedSymbol]) -> RunSummary {
        let progress = IndicatifProgress::steps_bar(&self.multi, "Transform");
        run_transform(
            &self.store,
            symbols,
            &self.config.sources.stock_interval,
            Some(&self.config.output_dir),
            progress.as_ref(),
        )
        .await
    }

    /// Loads the processed snapshot of each symbol into the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    #[allow(clippy::future_not_send)]
    pub async fn load(
        &self,
        symbols: &[TrackedSymbol],
    ) -> Result<RunSummary, Box<dyn std::error::Error>> {
        let conn = sink::open(&self.config.database_path)?;
        let progress = IndicatifProgress::steps_bar(&self.multi, "Load");
        Ok(run_load(&self.store, &conn, symbols, progress.as_ref()).await)
    }

    /// Runs `steps` in order over every tracked symbol and prints a
    /// summary after each step.
    ///
    /// # Errors
    ///
    /// Returns an error if a step cannot start at all (scratch directory,
    /// database) or a legacy-mode ingest aborts.
    #[allow(clippy::future_not_send)]
    pub async fn run(
        &self,
        steps: &[PipelineStep],
    ) -> Result<RunSummary, Box<dyn std::error::Error>> {
        let start = Instant::now();
        let mut summary = RunSummary::default();
        let mut symbols = self.config.tracked_symbols();

        for step in PipelineStep::ALL.iter().filter(|s| steps.contains(s)) {
            if symbols.is_empty() {
                log::warn!("No symbols left to process; skipping remaining steps");
                break;
            }

            let step_summary = match step {
                PipelineStep::Ingest => self.ingest(&symbols).await?,
                PipelineStep::Transform => self.transform(&symbols).await,
                PipelineStep::Load => self.load(&symbols).await?,
            };

            print_summary(step.label(), &step_summary);
            symbols = remaining(&symbols, &step_summary);
            summary.merge(step_summary);
        }

        log::info!(
            "Pipeline finished in {:.1}s: {summary}",
            start.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}

/// Symbols that did not fail in `summary`, in their original order.
fn remaining(symbols: &[TrackedSymbol], summary: &RunSummary) -> Vec<TrackedSymbol> {
    symbols
        .iter()
        .filter(|s| !summary.has_failed(s))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use indicatif::ProgressDrawTarget;
    use price_pipeline_config::RetryConfig;
    use price_pipeline_models::{Category, FailureKind, Stage, Step};
    use price_pipeline_source::SourceError;
    use price_pipeline_store::memory::MemoryObjectStore;
    use serde_json::{Value, json};

    use super::*;

    struct FakeSource {
        responses: BTreeMap<String, Value>,
    }

    #[async_trait]
    impl RemoteSource for FakeSource {
        async fn fetch(&self, category: Category, symbol: &str) -> Result<Value, SourceError> {
            let name = format!("{category}/{symbol}");
            self.responses
                .get(&name)
                .cloned()
                .ok_or(SourceError::Status {
                    url: format!("https://fake.test/{name}"),
                    status: 503,
                })
        }

        async fn fetch_unchecked(
            &self,
            category: Category,
            symbol: &str,
        ) -> Result<Value, SourceError> {
            self.fetch(category, symbol).await
        }

        fn validate(&self, _category: Category, _payload: &Value) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn work_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "price_pipeline_cli_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn pipeline(dir: &std::path::Path, responses: BTreeMap<String, Value>) -> Pipeline {
        let config = PipelineConfig {
            stock_symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            crypto_symbols: vec!["bitcoin".to_string()],
            scratch_dir: dir.join("scratch"),
            output_dir: dir.join("processed"),
            database_path: dir.join("prices.duckdb"),
            retry: RetryConfig::none(),
            ..PipelineConfig::default()
        };
        let store = SnapshotStore::new(
            Arc::new(MemoryObjectStore::new("test-bucket")),
            RetryConfig::none(),
        );

        Pipeline::new(
            config,
            store,
            Box::new(FakeSource { responses }),
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        )
    }

    #[test]
    fn remaining_drops_failed_symbols() {
        let aapl = TrackedSymbol::new(Category::Stock, "AAPL");
        let msft = TrackedSymbol::new(Category::Stock, "MSFT");
        let btc = TrackedSymbol::new(Category::Crypto, "bitcoin");

        let mut summary = RunSummary::default();
        summary.record_success(Step::Ingest, &aapl, 1);
        summary.record_failure(Step::Ingest, &msft, FailureKind::SourceUnavailable, "503");
        summary.record_success(Step::Ingest, &btc, 1);

        assert_eq!(
            remaining(&[aapl.clone(), msft, btc.clone()], &summary),
            vec![aapl, btc]
        );
    }

    #[tokio::test]
    async fn full_run_loads_successful_symbols_only() {
        let dir = work_dir("full_run");
        let mut responses = BTreeMap::new();
        responses.insert(
            "stocks/AAPL".to_string(),
            json!({
                "Time Series (5min)": {
                    "2024-01-01 09:30:00": {
                        "1. open": "100.0",
                        "2. high": "101.0",
                        "3. low": "99.0",
                        "4. close": "100.5",
                        "5. volume": "1000"
                    },
                    "2024-01-01 09:35:00": {
                        "1. open": "100.5",
                        "2. high": "102.0",
                        "3. low": "100.0",
                        "4. close": "101.0",
                        "5. volume": "1500"
                    }
                }
            }),
        );
        responses.insert(
            "crypto/bitcoin".to_string(),
            json!({ "prices": [[1_704_067_200_000_i64, 42_000.5], [1_704_067_500_000_i64, 42_100.0]] }),
        );
        let pipeline = pipeline(&dir, responses);

        let summary = pipeline.run(PipelineStep::ALL).await.unwrap();

        let msft = TrackedSymbol::new(Category::Stock, "MSFT");
        let failures: Vec<_> = summary
            .failures()
            .map(|(step, symbol, kind, _)| (step, symbol.clone(), kind))
            .collect();
        assert_eq!(
            failures,
            vec![(Step::Ingest, msft, FailureKind::SourceUnavailable)]
        );
        assert_eq!(summary.succeeded(), 6);

        let processed = pipeline
            .store
            .get(Category::Stock, "AAPL", Stage::Processed)
            .await
            .unwrap();
        assert_eq!(processed.key.to_key(), "processed/stocks/AAPL/AAPL_processed.csv");

        let conn = sink::open(&pipeline.config.database_path).unwrap();
        assert_eq!(sink::row_count(&conn, "stocks").unwrap(), 2);
        assert_eq!(sink::row_count(&conn, "crypto").unwrap(), 2);
        drop(conn);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn selected_steps_run_alone() {
        let dir = work_dir("transform_only");
        let pipeline = pipeline(&dir, BTreeMap::new());

        let summary = pipeline.run(&[PipelineStep::Transform]).await.unwrap();

        assert_eq!(summary.succeeded(), 0);
        assert!(
            summary
                .failures()
                .all(|(step, _, kind, _)| step == Step::Transform && kind == FailureKind::NotFound)
        );
        assert!(!pipeline.config.database_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
