use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries;
use crate::models::upload::{NewUpload, UploadRecord, UploadStatus};

/// Maximum rows returned by one `find_pending` call.
pub const PENDING_SWEEP_BATCH: i64 = 500;

/// Durable upload lifecycle. The only writer of upload status.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Assign identity and persist with status `pending`.
    async fn create(&self, new: NewUpload) -> Result<UploadRecord, MetadataError>;

    /// `pending -> uploaded`, recording the confirmed size and content type.
    async fn mark_uploaded(
        &self,
        id: Uuid,
        size: i64,
        content_type: &str,
    ) -> Result<UploadRecord, MetadataError>;

    /// Any non-terminal status `-> failed`.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError>;

    /// `pending -> failed` only; an upload confirmed meanwhile is left alone.
    async fn expire_pending(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>, MetadataError>;

    /// Pending records created more than `older_than` ago.
    async fn find_pending(&self, older_than: Duration) -> Result<Vec<UploadRecord>, MetadataError>;

    async fn ping(&self) -> Result<(), MetadataError>;
}

/// PostgreSQL-backed metadata store.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a guarded update matched no row.
    async fn rejected_transition(
        &self,
        id: Uuid,
        to: UploadStatus,
    ) -> Result<UploadRecord, MetadataError> {
        match queries::get_upload(&self.pool, id).await? {
            Some(current) => Err(MetadataError::InvalidTransition {
                id,
                from: current.status,
                to,
            }),
            None => Err(MetadataError::NotFound(id)),
        }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create(&self, new: NewUpload) -> Result<UploadRecord, MetadataError> {
        Ok(queries::create_upload(&self.pool, &new).await?)
    }

    async fn mark_uploaded(
        &self,
        id: Uuid,
        size: i64,
        content_type: &str,
    ) -> Result<UploadRecord, MetadataError> {
        match queries::mark_uploaded(&self.pool, id, size, content_type).await? {
            Some(record) => Ok(record),
            None => self.rejected_transition(id, UploadStatus::Uploaded).await,
        }
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError> {
        match queries::mark_failed(&self.pool, id, reason).await? {
            Some(record) => Ok(record),
            None => self.rejected_transition(id, UploadStatus::Failed).await,
        }
    }

    async fn expire_pending(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError> {
        match queries::expire_pending(&self.pool, id, reason).await? {
            Some(record) => Ok(record),
            None => self.rejected_transition(id, UploadStatus::Failed).await,
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>, MetadataError> {
        Ok(queries::get_upload(&self.pool, id).await?)
    }

    async fn find_pending(&self, older_than: Duration) -> Result<Vec<UploadRecord>, MetadataError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| MetadataError::InvalidInput(e.to_string()))?;
        let cutoff = Utc::now() - age;
        Ok(queries::get_pending_before(&self.pool, cutoff, PENDING_SWEEP_BATCH).await?)
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("upload {0} not found")]
    NotFound(Uuid),

    #[error("upload {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
