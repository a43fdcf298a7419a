use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::event::UploadEvent;

/// An event the publisher gave up on, kept for re-drive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub event: UploadEvent,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub redriven_at: Option<DateTime<Utc>>,
}
