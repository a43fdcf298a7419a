use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::decode_enum;
use crate::models::derivative::{DerivativeKind, DerivativeRecord, NewDerivative};

fn derivative_from_row(row: &PgRow) -> Result<DerivativeRecord, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(DerivativeRecord {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        kind: decode_enum(&kind)?,
        artifact_key: row.try_get("artifact_key")?,
        status: decode_enum(&status)?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Find the derivative of `kind` for an upload, if one was recorded
pub async fn find_derivative(
    pool: &PgPool,
    upload_id: Uuid,
    kind: DerivativeKind,
) -> Result<Option<DerivativeRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, upload_id, kind, artifact_key, status, error, created_at
        FROM derivatives
        WHERE upload_id = $1 AND kind = $2
        "#,
    )
    .bind(upload_id)
    .bind(kind.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(derivative_from_row).transpose()
}

/// Insert a derivative record unless one already exists for `(upload_id, kind)`.
///
/// Returns the stored row, which is the pre-existing one when a concurrent
/// consumer won the race.
pub async fn insert_derivative(
    pool: &PgPool,
    new: &NewDerivative,
) -> Result<DerivativeRecord, sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO derivatives (upload_id, kind, artifact_key, status, error)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (upload_id, kind) DO NOTHING
        RETURNING id, upload_id, kind, artifact_key, status, error, created_at
        "#,
    )
    .bind(new.upload_id)
    .bind(new.kind.to_string())
    .bind(&new.artifact_key)
    .bind(new.status.to_string())
    .bind(&new.error)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => derivative_from_row(&row),
        None => find_derivative(pool, new.upload_id, new.kind)
            .await?
            .ok_or(sqlx::Error::RowNotFound),
    }
}

/// List all derivatives recorded for an upload
pub async fn list_derivatives(
    pool: &PgPool,
    upload_id: Uuid,
) -> Result<Vec<DerivativeRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, upload_id, kind, artifact_key, status, error, created_at
        FROM derivatives
        WHERE upload_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(upload_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(derivative_from_row).collect()
}

/// Delete a `failed` derivative so it can be processed again. Returns whether a row was removed.
pub async fn delete_failed_derivative(
    pool: &PgPool,
    upload_id: Uuid,
    kind: DerivativeKind,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM derivatives
        WHERE upload_id = $1 AND kind = $2 AND status = 'failed'
        "#,
    )
    .bind(upload_id)
    .bind(kind.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
