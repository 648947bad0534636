#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Snapshot storage for the price pipeline.
//!
//! [`ObjectStore`] is the flat key/value blob namespace (list-by-prefix,
//! head, get, put, copy, delete). Two backends implement it:
//!
//! - [`s3::S3ObjectStore`] talks to S3 or any S3-compatible endpoint.
//! - [`memory::MemoryObjectStore`] keeps objects in memory with a logical
//!   last-modified clock and failure injection, for tests and dry runs.
//!
//! [`SnapshotStore`] layers the snapshot lifecycle on top: deterministic
//! keys per stage, copy-then-delete archival, and the sliding retention
//! window over archived snapshots.

pub mod memory;
pub mod retry;
pub mod s3;
pub mod snapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use price_pipeline_models::FailureKind;
use strum_macros::{AsRefStr, Display};

pub use snapshot::{ArchiveReport, SnapshotStore};

/// Object-storage call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum StoreOp {
    #[strum(to_string = "ListObjectsV2")]
    List,
    #[strum(to_string = "HeadObject")]
    Head,
    #[strum(to_string = "GetObject")]
    Get,
    #[strum(to_string = "PutObject")]
    Put,
    #[strum(to_string = "CopyObject")]
    Copy,
    #[strum(to_string = "DeleteObject")]
    Delete,
}

/// Errors that can occur during object-storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An object-storage request failed.
    #[error("{op} failed for s3://{bucket}/{key}: {source}")]
    Request {
        /// Which call failed.
        op: StoreOp,
        /// Bucket name.
        bucket: String,
        /// Object key (or prefix, for listings).
        key: String,
        /// Whether retrying may succeed (network errors, throttling, 5xx).
        transient: bool,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The expected object does not exist.
    #[error("s3://{bucket}/{key} not found")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key (or prefix when no object matched).
        key: String,
    },
}

impl StoreError {
    /// Whether the failure is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Request { transient: true, .. })
    }

    /// Failure classification for run summaries.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Request { .. } => FailureKind::StorageFailure,
            Self::NotFound { .. } => FailureKind::NotFound,
        }
    }
}

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Entity tag with surrounding quotes stripped. For single-part
    /// uploads this is the MD5 hex digest of the body.
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Flat key/value blob namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name, for logging and error messages.
    fn bucket(&self) -> &str;

    /// Lists every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Returns object metadata, or `None` if the object doesn't exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Reads an object's full body.
    ///
    /// Returns [`StoreError::NotFound`] if the object doesn't exist.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Writes an object, replacing any existing object at `key`.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Server-side byte-for-byte copy within the bucket.
    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Strips the quotes S3 wraps around `ETag` values.
#[must_use]
pub fn clean_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let transient = StoreError::Request {
            op: StoreOp::Copy,
            bucket: "b".to_string(),
            key: "k".to_string(),
            transient: true,
            source: "connection reset".into(),
        };
        assert!(transient.is_transient());
        assert_eq!(transient.kind(), FailureKind::StorageFailure);
        assert_eq!(
            transient.to_string(),
            "CopyObject failed for s3://b/k: connection reset"
        );

        let missing = StoreError::NotFound {
            bucket: "b".to_string(),
            key: "k".to_string(),
        };
        assert!(!missing.is_transient());
        assert_eq!(missing.kind(), FailureKind::NotFound);
    }

    #[test]
    fn strips_etag_quotes() {
        assert_eq!(clean_etag("\"abc123\""), "abc123");
        assert_eq!(clean_etag("abc123"), "abc123");
    }
}
