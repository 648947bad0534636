//! S3 (or S3-compatible) [`ObjectStore`] backend.
//!
//! Credentials come from the standard AWS provider chain
//! (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, profiles, instance
//! roles). Set [`StorageConfig::endpoint_url`] to target `MinIO`, R2, or
//! localstack; path-style addressing is enabled automatically in that case.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::StalledStreamProtectionConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use price_pipeline_config::{PipelineConfig, StorageConfig};

use crate::{ObjectMeta, ObjectStore, SnapshotStore, StoreError, StoreOp, clean_etag};

/// Object store backed by an S3 bucket.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Creates a client for the configured bucket and region.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());

        if let Some(endpoint) = &config.endpoint_url {
            log::info!("Using S3 endpoint override {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    /// [`SnapshotStore`] over the configured bucket with the configured
    /// retry policy.
    pub async fn snapshot_store(config: &PipelineConfig) -> SnapshotStore {
        let objects = Self::from_config(&config.storage).await;
        log::info!("Using bucket s3://{}", objects.bucket);
        SnapshotStore::new(Arc::new(objects), config.retry)
    }

    fn request_error<E>(&self, op: StoreOp, key: &str, err: SdkError<E, HttpResponse>) -> StoreError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Request {
            op,
            bucket: self.bucket.clone(),
            key: key.to_string(),
            transient: is_transient(&err),
            source: Box::new(err),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        log::debug!("Listing s3://{}/{prefix}*", self.bucket);

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| self.request_error(StoreOp::List, prefix, e))?;

            for obj in output.contents() {
                let Some(key) = obj.key() else {
                    continue;
                };
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    etag: obj.e_tag().map(clean_etag),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::debug!("  found {} objects", objects.len());
        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: output
                    .content_length()
                    .and_then(|s| u64::try_from(s).ok())
                    .unwrap_or(0),
                etag: output.e_tag().map(clean_etag),
                last_modified: output
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
            })),
            Err(err) => {
                // A missing object is not an error here
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(self.request_error(StoreOp::Head, key, err))
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return Err(StoreError::NotFound {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    });
                }
                return Err(self.request_error(StoreOp::Get, key, err));
            }
        };

        let bytes = output.body.collect().await.map_err(|e| StoreError::Request {
            op: StoreOp::Get,
            bucket: self.bucket.clone(),
            key: key.to_string(),
            transient: true,
            source: Box::new(e),
        })?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        #[allow(clippy::cast_precision_loss)] // display-only KB value
        let kb = body.len() as f64 / 1024.0;
        log::info!("Uploading s3://{}/{key} ({kb:.1} KB)", self.bucket);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| self.request_error(StoreOp::Put, key, e))?;

        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        log::info!(
            "Copying s3://{bucket}/{from} -> s3://{bucket}/{to}",
            bucket = self.bucket
        );

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, from))
            .key(to)
            .send()
            .await
            .map_err(|e| self.request_error(StoreOp::Copy, to, e))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        log::info!("Deleting s3://{}/{key}", self.bucket);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.request_error(StoreOp::Delete, key, e))?;

        Ok(())
    }
}

/// Returns `true` for failures a retry may fix: timeouts, dispatch and
/// response errors, throttling (429), and server errors (5xx).
/// Access-denied and other 4xx responses are permanent.
fn is_transient<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => is_transient_status(ctx.raw().status().as_u16()),
        _ => false,
    }
}

const fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// `CopySource` header value: bucket plus the percent-encoded key, with the
/// `/` separators left intact.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}
