use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle of an upload: `pending -> uploaded`, and either of those `-> failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

/// Durable record of one uploaded object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: Uuid,
    pub original_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size: i64,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when reserving a new upload.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub original_name: String,
    pub storage_key: String,
    pub content_type: String,
}

/// POST /uploads/presign body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(length(min = 3, max = 255), custom(is_mime_type))]
    pub content_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub id: Uuid,
    pub upload_url: String,
    pub storage_key: String,
}

/// POST /uploads/{id}/confirm body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    #[garde(range(min = 1))]
    pub size: i64,

    #[garde(length(min = 3, max = 255), custom(is_mime_type))]
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlQuery {
    pub expiry_secs: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_in: u32,
}

/// Accepts `type/subtype` with optional parameters (`text/plain; charset=utf-8`).
pub fn is_mime_type(value: &str, _context: &()) -> garde::Result {
    let essence = value.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, sub))
            if !kind.is_empty() && !sub.is_empty() && !sub.contains('/') && !essence.contains(' ') =>
        {
            Ok(())
        }
        _ => Err(garde::Error::new("must be a MIME type such as image/png")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_column_text_round_trips() {
        assert_eq!(UploadStatus::Uploaded.to_string(), "uploaded");
        assert_eq!(UploadStatus::from_str("pending").unwrap(), UploadStatus::Pending);
        assert!(UploadStatus::from_str("processing").is_err());
    }

    #[test]
    fn confirm_request_rejects_bad_input() {
        let ok = ConfirmRequest {
            size: 1024,
            content_type: "image/png".to_string(),
        };
        assert!(ok.validate().is_ok());

        let empty = ConfirmRequest {
            size: 0,
            content_type: "image/png".to_string(),
        };
        assert!(empty.validate().is_err());

        let not_mime = ConfirmRequest {
            size: 10,
            content_type: "png".to_string(),
        };
        assert!(not_mime.validate().is_err());
    }

    #[test]
    fn mime_type_with_parameters_is_accepted() {
        assert!(is_mime_type("text/plain; charset=utf-8", &()).is_ok());
        assert!(is_mime_type("image/", &()).is_err());
        assert!(is_mime_type("a/b/c", &()).is_err());
    }
}
