//! Snapshot lifecycle over an [`ObjectStore`]: deterministic keys, archival,
//! and retention.
//!
//! ## Archival
//!
//! [`SnapshotStore::archive`] moves every current snapshot of a pair into
//! the archived stage by copying it and only then deleting the original, so
//! a failure mid-move can duplicate a snapshot but never lose one. If a
//! previous run already copied an object (same `ETag` at the destination),
//! the copy is skipped and only the delete is repeated.
//!
//! ## Retention
//!
//! After moving, archived snapshots are ordered by storage last-modified
//! time (newest first, ties broken by key) and everything past
//! `max_archives` is deleted. Eviction is permanent.
//!
//! Archive-before-put is a protocol between the ingestion driver and this
//! store; nothing here prevents a second current snapshot from being
//! written without archiving first.

use std::cmp::Reverse;
use std::sync::Arc;

use price_pipeline_config::RetryConfig;
use price_pipeline_models::{Category, Snapshot, SnapshotKey, Stage, pair_prefix};

use crate::retry::with_retry;
use crate::{ObjectMeta, ObjectStore, StoreError};

/// What one [`SnapshotStore::archive`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Current keys moved into the archive.
    pub moved: Vec<String>,
    /// Moves whose copy was skipped because the archived object already
    /// matched.
    pub copies_skipped: usize,
    /// Archived keys deleted by the retention window.
    pub evicted: Vec<String>,
}

impl ArchiveReport {
    /// `true` if nothing was moved or evicted.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.moved.is_empty() && self.evicted.is_empty()
    }
}

/// Keyed snapshot storage with archive/retention semantics.
#[derive(Clone)]
pub struct SnapshotStore {
    objects: Arc<dyn ObjectStore>,
    retry: RetryConfig,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(objects: Arc<dyn ObjectStore>, retry: RetryConfig) -> Self {
        Self { objects, retry }
    }

    /// Bucket name of the underlying store.
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.objects.bucket()
    }

    /// Keys of every current-stage snapshot of a pair, oldest label first.
    ///
    /// Only `.json` objects count as snapshots; anything else under the
    /// prefix is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the listing fails.
    pub async fn list_current(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .current_objects(category, symbol)
            .await?
            .into_iter()
            .map(|m| m.key)
            .collect())
    }

    /// Archived snapshots of a pair in retention order (most recently
    /// modified first).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the listing fails.
    pub async fn list_archived(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let prefix = pair_prefix(Stage::Archived, category, symbol);
        let mut archived = self.list(&prefix).await?;
        sort_newest_first(&mut archived);
        Ok(archived)
    }

    /// Moves every current snapshot of a pair into the archive, then trims
    /// the archive to the `max_archives` most recently modified entries.
    ///
    /// Returns immediately if the pair has no current snapshot, so a
    /// second call without an intervening [`Self::put`] is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the first failing list, copy, or delete.
    /// The remaining steps for the pair are skipped; objects already moved
    /// stay moved and a failed copy leaves its original in place.
    pub async fn archive(
        &self,
        category: Category,
        symbol: &str,
        max_archives: usize,
    ) -> Result<ArchiveReport, StoreError> {
        let current = self.current_objects(category, symbol).await?;
        if current.is_empty() {
            log::debug!("{category}/{symbol}: nothing to archive");
            return Ok(ArchiveReport::default());
        }

        let archive_prefix = pair_prefix(Stage::Archived, category, symbol);
        let mut report = ArchiveReport::default();

        for object in current {
            let file_name = object.key.rsplit('/').next().unwrap_or(&object.key);
            let archive_key = format!("{archive_prefix}{file_name}");

            if self.already_archived(&object, &archive_key).await? {
                log::info!("  {archive_key} already archived, skipping copy");
                report.copies_skipped += 1;
            } else {
                with_retry(&self.retry, "archive copy", || {
                    self.objects.copy(&object.key, &archive_key)
                })
                .await?;
            }

            with_retry(&self.retry, "archive delete", || self.objects.delete(&object.key))
                .await?;

            log::info!("Archived {} to {archive_key}", object.key);
            report.moved.push(object.key);
        }

        report.evicted = self.enforce_retention(category, symbol, max_archives).await?;

        Ok(report)
    }

    /// Writes a snapshot under its deterministic key for `stage`,
    /// replacing any object already there.
    ///
    /// Processed snapshots ignore `captured_at`: they always land on the
    /// single `{symbol}_processed.csv` key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the upload fails after retries.
    pub async fn put(
        &self,
        category: Category,
        symbol: &str,
        stage: Stage,
        payload: Vec<u8>,
        captured_at: &str,
    ) -> Result<SnapshotKey, StoreError> {
        let key = match stage {
            Stage::Processed => SnapshotKey::processed(category, symbol),
            Stage::Current | Stage::Archived => {
                SnapshotKey::new(stage, category, symbol, captured_at)
            }
        };
        let object_key = key.to_key();

        with_retry(&self.retry, "put", || {
            self.objects
                .put(&object_key, payload.clone(), stage.content_type())
        })
        .await?;

        log::info!("Uploaded s3://{}/{object_key}", self.bucket());
        Ok(key)
    }

    /// Reads the snapshot of a pair in `stage`.
    ///
    /// - processed: the fixed `{symbol}_processed.csv` key.
    /// - current: the single current snapshot (the latest label if the
    ///   archive protocol was skipped and several exist).
    /// - archived: the most recently modified archived snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no matching object exists, or
    /// [`StoreError::Request`] if a call fails after retries.
    pub async fn get(
        &self,
        category: Category,
        symbol: &str,
        stage: Stage,
    ) -> Result<Snapshot, StoreError> {
        let object_key = match stage {
            Stage::Processed => SnapshotKey::processed(category, symbol).to_key(),
            Stage::Current => {
                let keys = self.list_current(category, symbol).await?;
                if keys.len() > 1 {
                    log::warn!(
                        "{category}/{symbol}: {} current snapshots found, reading the latest",
                        keys.len()
                    );
                }
                keys.into_iter()
                    .next_back()
                    .ok_or_else(|| self.not_found(&pair_prefix(stage, category, symbol)))?
            }
            Stage::Archived => self
                .list_archived(category, symbol)
                .await?
                .into_iter()
                .next()
                .map(|m| m.key)
                .ok_or_else(|| self.not_found(&pair_prefix(stage, category, symbol)))?,
        };

        let payload = with_retry(&self.retry, "get", || self.objects.get(&object_key)).await?;

        let key = SnapshotKey::parse(&object_key)
            .unwrap_or_else(|| SnapshotKey::new(stage, category, symbol, ""));

        Ok(Snapshot { key, payload })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        with_retry(&self.retry, "list", || self.objects.list(prefix)).await
    }

    async fn current_objects(
        &self,
        category: Category,
        symbol: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let prefix = pair_prefix(Stage::Current, category, symbol);
        let extension = format!(".{}", Stage::Current.extension());
        let mut objects: Vec<ObjectMeta> = self
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|m| m.key.ends_with(&extension))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    /// Whether `archive_key` already holds the same bytes as `current`.
    async fn already_archived(
        &self,
        current: &ObjectMeta,
        archive_key: &str,
    ) -> Result<bool, StoreError> {
        let Some(source_etag) = &current.etag else {
            return Ok(false);
        };
        let existing = with_retry(&self.retry, "head", || self.objects.head(archive_key)).await?;
        Ok(existing.is_some_and(|m| m.etag.as_ref() == Some(source_etag)))
    }

    async fn enforce_retention(
        &self,
        category: Category,
        symbol: &str,
        max_archives: usize,
    ) -> Result<Vec<String>, StoreError> {
        let archived = self.list_archived(category, symbol).await?;
        let mut evicted = Vec::new();

        for object in archived.into_iter().skip(max_archives) {
            with_retry(&self.retry, "retention delete", || {
                self.objects.delete(&object.key)
            })
            .await?;
            log::info!(
                "Deleted old archive {} to maintain max {max_archives} files",
                object.key
            );
            evicted.push(object.key);
        }

        Ok(evicted)
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::NotFound {
            bucket: self.bucket().to_string(),
            key: key.to_string(),
        }
    }
}

/// Most recently modified first; objects without a timestamp sort last.
/// Equal timestamps fall back to key order, newest label first.
fn sort_newest_first(objects: &mut [ObjectMeta]) {
    objects.sort_by(|a, b| {
        (Reverse(a.last_modified), Reverse(&a.key)).cmp(&(Reverse(b.last_modified), Reverse(&b.key)))
    });
}
