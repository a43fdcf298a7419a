use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::derivative_queries;
use crate::models::derivative::{DerivativeKind, DerivativeRecord, NewDerivative};

/// Consumer-owned records of derived artifacts, at most one per `(upload, kind)`.
#[async_trait]
pub trait DerivativeStore: Send + Sync {
    async fn find(
        &self,
        upload_id: Uuid,
        kind: DerivativeKind,
    ) -> Result<Option<DerivativeRecord>, DerivativeError>;

    /// Insert unless a record already exists; returns whichever row is stored.
    async fn insert(&self, new: NewDerivative) -> Result<DerivativeRecord, DerivativeError>;

    async fn list_for_upload(&self, upload_id: Uuid)
        -> Result<Vec<DerivativeRecord>, DerivativeError>;

    /// Remove a `failed` record so the pair is unprocessed again. Returns false if none existed.
    async fn reset_failed(&self, upload_id: Uuid, kind: DerivativeKind)
        -> Result<bool, DerivativeError>;
}

#[derive(Clone)]
pub struct PgDerivativeStore {
    pool: PgPool,
}

impl PgDerivativeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DerivativeStore for PgDerivativeStore {
    async fn find(
        &self,
        upload_id: Uuid,
        kind: DerivativeKind,
    ) -> Result<Option<DerivativeRecord>, DerivativeError> {
        Ok(derivative_queries::find_derivative(&self.pool, upload_id, kind).await?)
    }

    async fn insert(&self, new: NewDerivative) -> Result<DerivativeRecord, DerivativeError> {
        Ok(derivative_queries::insert_derivative(&self.pool, &new).await?)
    }

    async fn list_for_upload(
        &self,
        upload_id: Uuid,
    ) -> Result<Vec<DerivativeRecord>, DerivativeError> {
        Ok(derivative_queries::list_derivatives(&self.pool, upload_id).await?)
    }

    async fn reset_failed(
        &self,
        upload_id: Uuid,
        kind: DerivativeKind,
    ) -> Result<bool, DerivativeError> {
        Ok(derivative_queries::delete_failed_derivative(&self.pool, upload_id, kind).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DerivativeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
