//! In-memory [`ObjectStore`] backend.
//!
//! Every put or copy advances a logical clock by one second, so
//! `last_modified` order is exactly write order. Failures can be injected
//! per operation and key to exercise partial-failure paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{ObjectMeta, ObjectStore, StoreError, StoreOp};

/// Start of the logical clock (2024-01-01T00:00:00Z).
const CLOCK_EPOCH_SECS: i64 = 1_704_067_200;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    etag: String,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    op: StoreOp,
    key: String,
    transient: bool,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    ticks: i64,
    failures: Vec<InjectedFailure>,
    calls: Vec<(StoreOp, String)>,
}

impl Inner {
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        DateTime::<Utc>::from_timestamp(CLOCK_EPOCH_SECS, 0).unwrap_or_default()
            + Duration::seconds(self.ticks)
    }

    fn check(&mut self, bucket: &str, op: StoreOp, key: &str) -> Result<(), StoreError> {
        self.calls.push((op, key.to_string()));

        let Some(failure) = self
            .failures
            .iter_mut()
            .find(|f| f.op == op && f.key == key && f.remaining > 0)
        else {
            return Ok(());
        };
        failure.remaining -= 1;

        Err(StoreError::Request {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            transient: failure.transient,
            source: format!("injected {op} failure").into(),
        })
    }

    fn meta(key: &str, object: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: object.body.len() as u64,
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
        }
    }
}

/// Object store held entirely in memory.
///
/// Cloning shares the underlying objects, so a test can hand one clone to
/// the [`crate::SnapshotStore`] and inspect the bucket through another.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `times` calls of `op` on `key` fail.
    pub fn fail(&self, op: StoreOp, key: &str, transient: bool, times: usize) {
        self.lock().failures.push(InjectedFailure {
            op,
            key: key.to_string(),
            transient,
            remaining: times,
        });
    }

    /// Overrides an object's last-modified time (simulates clock skew).
    pub fn set_last_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(object) = self.lock().objects.get_mut(key) {
            object.last_modified = at;
        }
    }

    /// Every stored key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Stored keys under `prefix`, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Body of a stored object.
    #[must_use]
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.body.clone())
    }

    /// Content type a stored object was uploaded with.
    #[must_use]
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().objects.get(key).map(|o| o.content_type.clone())
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(StoreOp, String)> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::List, prefix)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| Inner::meta(k, o))
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::Head, key)?;
        Ok(inner.objects.get(key).map(|o| Inner::meta(key, o)))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::Get, key)?;
        inner
            .objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::Put, key)?;
        let last_modified = inner.tick();
        let etag = format!("{:x}", md5::compute(&body));
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                etag,
                content_type: content_type.to_string(),
                last_modified,
            },
        );
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::Copy, to)?;
        let Some(source) = inner.objects.get(from).cloned() else {
            return Err(StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: from.to_string(),
            });
        };
        let last_modified = inner.tick();
        inner.objects.insert(
            to.to_string(),
            StoredObject {
                last_modified,
                ..source
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check(&self.bucket, StoreOp::Delete, key)?;
        inner.objects.remove(key);
        Ok(())
    }
}
