use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::dead_letter_queries;
use crate::models::dead_letter::DeadLetter;
use crate::models::event::UploadEvent;

/// Local log of events the publisher could not deliver.
#[async_trait]
pub trait DeadLetterLog: Send + Sync {
    async fn record(
        &self,
        event: &UploadEvent,
        error: &str,
        attempts: u32,
    ) -> Result<Uuid, sqlx::Error>;

    /// Oldest dead letters not yet re-driven.
    async fn pending(&self, limit: usize) -> Result<Vec<DeadLetter>, sqlx::Error>;

    async fn pending_count(&self) -> Result<u64, sqlx::Error>;

    async fn mark_redriven(&self, id: Uuid) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgDeadLetterLog {
    pool: PgPool,
}

impl PgDeadLetterLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterLog for PgDeadLetterLog {
    async fn record(
        &self,
        event: &UploadEvent,
        error: &str,
        attempts: u32,
    ) -> Result<Uuid, sqlx::Error> {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
        dead_letter_queries::insert_dead_letter(&self.pool, event, error, attempts).await
    }

    async fn pending(&self, limit: usize) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        dead_letter_queries::get_pending_dead_letters(&self.pool, limit).await
    }

    async fn pending_count(&self) -> Result<u64, sqlx::Error> {
        let count = dead_letter_queries::count_pending_dead_letters(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn mark_redriven(&self, id: Uuid) -> Result<(), sqlx::Error> {
        dead_letter_queries::mark_redriven(&self.pool, id).await
    }
}
