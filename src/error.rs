//! Application error taxonomy and its HTTP rendering.
//!
//! Handlers return `Result<_, AppError>`. Component errors convert with `?`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::services::derivatives::DerivativeError;
use crate::services::metadata::MetadataError;
use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed request, rejected before any write.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Status conflict. Retrying the same request will not succeed.
    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    StorageUnavailable(String),

    #[error("{0}")]
    PublishFailure(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PublishFailure(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::PublishFailure(_) => "publish_failure",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
            match self {
                AppError::Internal(_) => "internal error".to_string(),
                other => other.to_string(),
            }
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(_) => AppError::NotFound(err.to_string()),
            MetadataError::InvalidTransition { .. } => AppError::InvalidTransition(err.to_string()),
            MetadataError::InvalidInput(msg) => AppError::InvalidInput(msg),
            MetadataError::Database(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput(msg) => AppError::InvalidInput(msg),
            StorageError::NotFound(_) => AppError::NotFound(err.to_string()),
            StorageError::Unavailable(_) | StorageError::Timeout(_) => {
                AppError::StorageUnavailable(err.to_string())
            }
            StorageError::Rejected { .. } | StorageError::Config(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<DerivativeError> for AppError {
    fn from(err: DerivativeError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::InvalidInput(report.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(format!("Invalid request body: {}", rejection.body_text()))
    }
}

/// JSON body extractor that also runs `garde` validation; both failures are `InvalidInput`.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    <T as Validate>::Context: Default,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
