use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::dead_letter::DeadLetter;
use crate::models::event::UploadEvent;

/// Record an event the publisher could not deliver
pub async fn insert_dead_letter(
    pool: &PgPool,
    event: &UploadEvent,
    error: &str,
    attempts: i32,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO event_dead_letters (upload_id, payload, error, attempts)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.record_id)
    .bind(Json(event))
    .bind(error)
    .bind(attempts)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

/// Dead letters not yet re-driven, oldest first
pub async fn get_pending_dead_letters(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<DeadLetter>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, payload, error, attempts, created_at, redriven_at
        FROM event_dead_letters
        WHERE redriven_at IS NULL
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let Json(event): Json<UploadEvent> = r.try_get("payload")?;
            Ok(DeadLetter {
                id: r.try_get("id")?,
                event,
                error: r.try_get("error")?,
                attempts: r.try_get("attempts")?,
                created_at: r.try_get("created_at")?,
                redriven_at: r.try_get("redriven_at")?,
            })
        })
        .collect()
}

/// Count dead letters awaiting re-drive
pub async fn count_pending_dead_letters(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS pending FROM event_dead_letters WHERE redriven_at IS NULL")
        .fetch_one(pool)
        .await?;

    row.try_get("pending")
}

/// Stamp a dead letter as re-driven
pub async fn mark_redriven(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE event_dead_letters
        SET redriven_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
