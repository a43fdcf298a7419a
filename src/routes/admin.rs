use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::derivative::DerivativeKind;
use crate::services::publisher::{PublishOutcome, RedriveReport};

const DEFAULT_REDRIVE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RedriveQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeRedriveResponse {
    pub upload_id: Uuid,
    pub kind: DerivativeKind,
    pub publish_attempts: u32,
}

/// POST /admin/dead-letters/redrive — re-append undelivered upload events.
pub async fn redrive_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<RedriveQuery>,
) -> Result<Json<RedriveReport>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_REDRIVE_LIMIT);
    let report = state.publisher.redrive_dead_letters(limit).await?;
    tracing::info!(
        redriven = report.redriven,
        failed = report.failed,
        remaining = report.remaining,
        "Dead-letter re-drive requested"
    );
    Ok(Json(report))
}

/// POST /admin/uploads/{id}/derivatives/{kind}/redrive — retry a failed derivative.
pub async fn redrive_derivative(
    State(state): State<AppState>,
    Path((id, kind)): Path<(Uuid, DerivativeKind)>,
) -> Result<(StatusCode, Json<DerivativeRedriveResponse>), AppError> {
    let publish_attempts = match state.uploads.redrive_derivative(id, kind).await? {
        PublishOutcome::Delivered { attempts } => attempts,
        _ => 0,
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(DerivativeRedriveResponse {
            upload_id: id,
            kind,
            publish_attempts,
        }),
    ))
}
