use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod admin;
pub mod health;
pub mod metrics;
pub mod uploads;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Request body limit that still admits a file of exactly `max_upload_bytes`.
pub fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES)
}

/// Upload, admin and health routes. The binary adds `/metrics` and the HTTP layers.
pub fn router(state: AppState) -> Router {
    let limit = body_limit(state.uploads.settings().max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/uploads",
            post(uploads::direct_upload).layer(DefaultBodyLimit::max(limit)),
        )
        .route("/uploads/presign", post(uploads::presign))
        .route("/uploads/{id}", get(uploads::get_upload))
        .route("/uploads/{id}/confirm", post(uploads::confirm))
        .route("/uploads/{id}/derivatives", get(uploads::list_derivatives))
        .route("/uploads/{id}/download-url", get(uploads::download_url))
        .route("/admin/dead-letters/redrive", post(admin::redrive_dead_letters))
        .route(
            "/admin/uploads/{id}/derivatives/{kind}/redrive",
            post(admin::redrive_derivative),
        )
        .with_state(state)
}
