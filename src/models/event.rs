//! Wire contract for upload events.
//!
//! Every consumer depends on this shape. Evolve it additively: new fields
//! must be optional so older consumers keep deserializing newer events and
//! newer consumers keep reading events already sitting in the log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::upload::UploadRecord;

/// Emitted once an upload's `uploaded` status is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    pub record_id: Uuid,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size: i64,
}

impl From<&UploadRecord> for UploadEvent {
    fn from(record: &UploadRecord) -> Self {
        Self {
            record_id: record.id,
            storage_key: record.storage_key.clone(),
            original_name: record.original_name.clone(),
            content_type: record.content_type.clone(),
            size: record.size,
        }
    }
}
