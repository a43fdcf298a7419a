use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, ValidatedJson};
use crate::models::derivative::DerivativeRecord;
use crate::models::upload::{
    ConfirmRequest, DownloadUrlQuery, DownloadUrlResponse, PresignRequest, PresignResponse,
    UploadRecord,
};

/// POST /uploads/presign — reserve an upload and get a presigned PUT URL.
pub async fn presign(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<PresignRequest>,
) -> Result<Json<PresignResponse>, AppError> {
    let response = state
        .uploads
        .presign(&request.filename, &request.content_type)
        .await?;
    Ok(Json(response))
}

/// POST /uploads/{id}/confirm — the client finished its PUT.
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<ConfirmRequest>,
) -> Result<Json<UploadRecord>, AppError> {
    let record = state
        .uploads
        .confirm_upload(id, request.size, &request.content_type)
        .await?;
    Ok(Json(record))
}

/// POST /uploads — multipart upload through the API (field `file`).
pub async fn direct_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadRecord>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidInput("file field has no filename".to_string()))?;
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;

        let record = state
            .uploads
            .direct_upload(&filename, &content_type, &data)
            .await?;
        return Ok(Json(record));
    }

    Err(AppError::InvalidInput("multipart field `file` is required".to_string()))
}

/// GET /uploads/{id}
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadRecord>, AppError> {
    Ok(Json(state.uploads.get(id).await?))
}

/// GET /uploads/{id}/derivatives — may lag the upload's own status.
pub async fn list_derivatives(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DerivativeRecord>>, AppError> {
    Ok(Json(state.uploads.derivatives(id).await?))
}

/// GET /uploads/{id}/download-url
pub async fn download_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadUrlQuery>,
) -> Result<Json<DownloadUrlResponse>, AppError> {
    Ok(Json(state.uploads.download_url(id, query.expiry_secs).await?))
}
