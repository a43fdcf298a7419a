use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Kind of artifact a consumer derives from an upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DerivativeKind {
    Thumbnail,
}

/// Outcome recorded for a `(upload, kind)` pair. Absence of a row means unprocessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DerivativeStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeRecord {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub kind: DerivativeKind,
    pub artifact_key: String,
    pub status: DerivativeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Helper for inserting derivative records
#[derive(Debug, Clone)]
pub struct NewDerivative {
    pub upload_id: Uuid,
    pub kind: DerivativeKind,
    pub artifact_key: String,
    pub status: DerivativeStatus,
    pub error: Option<String>,
}
