use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::future::Future;
use std::time::Duration;

use crate::services::retry::{retry_with_backoff, RetryPolicy};

/// Byte-level access to the blob store, addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return the key.
    async fn upload(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<String, StorageError>;

    /// Time-bounded PUT URL. No bytes move through this process.
    async fn presign_upload(&self, key: &str, expiry: Duration) -> Result<String, StorageError>;

    /// Time-bounded GET URL.
    async fn presign_download(&self, key: &str, expiry: Duration)
        -> Result<String, StorageError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Client for S3-compatible object storage (MinIO, R2, S3).
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
    timeout: Duration,
    retry: RetryPolicy,
}

/// Connection settings for [`S3ObjectStore`].
pub struct S3Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub path_style: bool,
}

impl S3ObjectStore {
    pub fn new(
        settings: S3Settings<'_>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: settings.region.to_string(),
            endpoint: settings.endpoint.to_string(),
        };

        let credentials = Credentials::new(
            Some(settings.access_key),
            Some(settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if settings.path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            timeout,
            retry,
        })
    }

    /// Run one S3 call per attempt, each bounded by the configured timeout.
    async fn call<T, F, Fut>(&self, operation: &str, key: &str, make_call: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let timeout = self.timeout;
        retry_with_backoff(&self.retry, operation, StorageError::is_transient, || {
            let attempt = make_call();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Timeout(timeout)),
                }
            }
        })
        .await
        .inspect_err(|e| tracing::error!(operation, key, error = %e, "Object store call failed"))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        if data.is_empty() {
            return Err(StorageError::InvalidInput(format!("empty upload for {key}")));
        }

        self.call("put_object", key, || async move {
            let response = self
                .bucket
                .put_object_with_content_type(key, data, content_type)
                .await
                .map_err(|e| classify(e, key))?;
            check_status(response.status_code(), key)
        })
        .await?;

        Ok(key.to_string())
    }

    async fn presign_upload(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        self.bucket
            .presign_put(key, expiry_secs(expiry), None, None)
            .await
            .map_err(|e| StorageError::Config(e.to_string()))
    }

    async fn presign_download(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        self.bucket
            .presign_get(key, expiry_secs(expiry), None)
            .await
            .map_err(|e| StorageError::Config(e.to_string()))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.call("get_object", key, || async move {
            let response = self.bucket.get_object(key).await.map_err(|e| classify(e, key))?;
            check_status(response.status_code(), key)?;
            Ok(response.to_vec())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let result = self
            .call("delete_object", key, || async move {
                let response = self.bucket.delete_object(key).await.map_err(|e| classify(e, key))?;
                check_status(response.status_code(), key)
            })
            .await;

        match result {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

/// Presigned URL lifetimes are capped at seven days by SigV4.
/// Longest lifetime SigV4 allows for a presigned URL.
pub const MAX_PRESIGN_EXPIRY_SECS: u32 = 7 * 24 * 3600;

fn expiry_secs(expiry: Duration) -> u32 {
    expiry.as_secs().clamp(1, u64::from(MAX_PRESIGN_EXPIRY_SECS)) as u32
}

fn check_status(status: u16, key: &str) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        408 | 429 | 500..=599 => Err(StorageError::Unavailable(format!(
            "object store returned {status} for {key}"
        ))),
        _ => Err(StorageError::Rejected {
            status,
            key: key.to_string(),
        }),
    }
}

fn classify(error: S3Error, key: &str) -> StorageError {
    match error {
        S3Error::HttpFailWithBody(status, _) => match check_status(status, key) {
            Ok(()) => StorageError::Unavailable(format!("unexpected response for {key}")),
            Err(e) => e,
        },
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    Unavailable(String),

    #[error("object store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("object store rejected request for {key} with status {status}")]
    Rejected { status: u16, key: String },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}
