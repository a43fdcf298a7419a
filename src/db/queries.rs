use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::decode_enum;
use crate::models::upload::{NewUpload, UploadRecord, UploadStatus};

const UPLOAD_COLUMNS: &str = "id, original_name, storage_key, content_type, size, status, \
                              failure_reason, created_at, updated_at";

fn upload_from_row(row: &PgRow) -> Result<UploadRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(UploadRecord {
        id: row.try_get("id")?,
        original_name: row.try_get("original_name")?,
        storage_key: row.try_get("storage_key")?,
        content_type: row.try_get("content_type")?,
        size: row.try_get("size")?,
        status: decode_enum(&status)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new pending upload
pub async fn create_upload(pool: &PgPool, new: &NewUpload) -> Result<UploadRecord, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO uploads (original_name, storage_key, content_type, status)
        VALUES ($1, $2, $3, 'pending')
        RETURNING {UPLOAD_COLUMNS}
        "#
    ))
    .bind(&new.original_name)
    .bind(&new.storage_key)
    .bind(&new.content_type)
    .fetch_one(pool)
    .await?;

    upload_from_row(&row)
}

/// Get an upload by ID
pub async fn get_upload(pool: &PgPool, id: Uuid) -> Result<Option<UploadRecord>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(upload_from_row).transpose()
}

/// Compare-and-swap `pending -> uploaded`. `None` means the row was not pending (or is absent).
pub async fn mark_uploaded(
    pool: &PgPool,
    id: Uuid,
    size: i64,
    content_type: &str,
) -> Result<Option<UploadRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE uploads
        SET status = 'uploaded',
            size = $2,
            content_type = $3,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {UPLOAD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(size)
    .bind(content_type)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(upload_from_row).transpose()
}

/// Move a non-terminal upload to `failed`. `None` means it was already failed (or is absent).
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
) -> Result<Option<UploadRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE uploads
        SET status = 'failed',
            failure_reason = $2,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'uploaded')
        RETURNING {UPLOAD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(upload_from_row).transpose()
}

/// Compare-and-swap `pending -> failed` for uploads the client never confirmed.
pub async fn expire_pending(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
) -> Result<Option<UploadRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE uploads
        SET status = 'failed',
            failure_reason = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {UPLOAD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(upload_from_row).transpose()
}

/// Pending uploads created before `cutoff`, oldest first (for the reconciliation sweep)
pub async fn get_pending_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<UploadRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {UPLOAD_COLUMNS}
        FROM uploads
        WHERE status = $1 AND created_at < $2
        ORDER BY created_at ASC
        LIMIT $3
        "#
    ))
    .bind(UploadStatus::Pending.to_string())
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(upload_from_row).collect()
}
