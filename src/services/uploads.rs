//! Orchestrating service: the single place where a metadata commit is tied
//! to event emission.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::derivative::{DerivativeKind, DerivativeRecord};
use crate::models::upload::{
    is_mime_type, DownloadUrlResponse, NewUpload, PresignResponse, UploadRecord, UploadStatus,
};
use crate::services::derivatives::DerivativeStore;
use crate::services::metadata::{MetadataError, MetadataStore};
use crate::services::publisher::{EventPublisher, PublishOutcome};
use crate::services::storage::{ObjectStore, MAX_PRESIGN_EXPIRY_SECS};

const MAX_KEY_NAME_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub presign_expiry: Duration,
    pub download_url_expiry: Duration,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub failed: usize,
    pub skipped: usize,
}

pub struct UploadService {
    metadata: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    derivatives: Arc<dyn DerivativeStore>,
    publisher: Arc<EventPublisher>,
    settings: UploadSettings,
}

impl UploadService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        derivatives: Arc<dyn DerivativeStore>,
        publisher: Arc<EventPublisher>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            metadata,
            store,
            derivatives,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Reserve a storage key, presign a PUT for it and record the pending upload.
    pub async fn presign(&self, filename: &str, content_type: &str) -> Result<PresignResponse, AppError> {
        validate_upload_fields(filename, content_type)?;

        let storage_key = storage_key_for(filename);
        let upload_url = self
            .store
            .presign_upload(&storage_key, self.settings.presign_expiry)
            .await?;

        let record = self
            .metadata
            .create(NewUpload {
                original_name: filename.to_string(),
                storage_key: storage_key.clone(),
                content_type: content_type.to_string(),
            })
            .await?;

        metrics::counter!("uploads_presigned_total").increment(1);
        tracing::info!(upload_id = %record.id, storage_key = %storage_key, "Upload presigned");

        Ok(PresignResponse {
            id: record.id,
            upload_url,
            storage_key,
        })
    }

    /// Commit `pending -> uploaded`, then publish. A rejected transition
    /// publishes nothing; a failed publish does not undo the commit.
    pub async fn confirm_upload(
        &self,
        id: Uuid,
        size: i64,
        content_type: &str,
    ) -> Result<UploadRecord, AppError> {
        if size <= 0 {
            return Err(AppError::InvalidInput("size must be positive".to_string()));
        }
        is_mime_type(content_type, &()).map_err(|e| AppError::InvalidInput(e.to_string()))?;

        let record = match self.metadata.mark_uploaded(id, size, content_type).await {
            Ok(record) => record,
            Err(e) => {
                if let MetadataError::InvalidTransition { from, .. } = &e {
                    metrics::counter!("uploads_confirm_conflicts_total").increment(1);
                    tracing::warn!(upload_id = %id, status = %from, "Confirmation rejected");
                }
                return Err(e.into());
            }
        };

        metrics::counter!("uploads_confirmed_total").increment(1);
        tracing::info!(upload_id = %id, size, content_type, "Upload confirmed");

        let outcome = self.publisher.publish(&record).await;
        if !matches!(outcome, PublishOutcome::Delivered { .. }) {
            tracing::warn!(upload_id = %id, ?outcome, "Upload confirmed but event not delivered");
        }

        Ok(record)
    }

    /// Store bytes through this process, then follow the same confirm path.
    pub async fn direct_upload(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<UploadRecord, AppError> {
        validate_upload_fields(filename, content_type)?;
        if data.is_empty() {
            return Err(AppError::InvalidInput("file is empty".to_string()));
        }
        if data.len() > self.settings.max_upload_bytes {
            return Err(AppError::InvalidInput(format!(
                "file exceeds {} bytes",
                self.settings.max_upload_bytes
            )));
        }

        let storage_key = storage_key_for(filename);
        self.store.upload(&storage_key, data, content_type).await?;

        let created = self
            .metadata
            .create(NewUpload {
                original_name: filename.to_string(),
                storage_key: storage_key.clone(),
                content_type: content_type.to_string(),
            })
            .await;

        let record = match created {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&storage_key).await {
                    tracing::warn!(storage_key = %storage_key, error = %cleanup, "Orphaned blob not removed");
                }
                return Err(e.into());
            }
        };

        self.confirm_upload(record.id, data.len() as i64, content_type).await
    }

    pub async fn get(&self, id: Uuid) -> Result<UploadRecord, AppError> {
        self.metadata
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("upload {id} not found")))
    }

    /// Derivative status is independent of upload status and may lag it.
    pub async fn derivatives(&self, id: Uuid) -> Result<Vec<DerivativeRecord>, AppError> {
        self.get(id).await?;
        Ok(self.derivatives.list_for_upload(id).await?)
    }

    pub async fn download_url(&self, id: Uuid, expiry_secs: Option<u32>) -> Result<DownloadUrlResponse, AppError> {
        let record = self.get(id).await?;
        if record.status != UploadStatus::Uploaded {
            return Err(AppError::InvalidTransition(format!(
                "upload {id} is {}, not uploaded",
                record.status
            )));
        }

        let expiry = match expiry_secs {
            Some(secs @ 1..=MAX_PRESIGN_EXPIRY_SECS) => Duration::from_secs(u64::from(secs)),
            Some(secs) => {
                return Err(AppError::InvalidInput(format!(
                    "expirySecs must be between 1 and {MAX_PRESIGN_EXPIRY_SECS}, got {secs}"
                )))
            }
            None => self.settings.download_url_expiry,
        };
        let url = self.store.presign_download(&record.storage_key, expiry).await?;

        Ok(DownloadUrlResponse {
            url,
            expires_in: expiry.as_secs() as u32,
        })
    }

    /// Fail pending uploads the client never confirmed and drop their blobs.
    pub async fn reconcile_stale(&self, older_than: Duration) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport::default();
        let reason = format!("upload not confirmed within {}s", older_than.as_secs());

        for record in self.metadata.find_pending(older_than).await? {
            match self.metadata.expire_pending(record.id, &reason).await {
                Ok(_) => {
                    report.failed += 1;
                    tracing::info!(upload_id = %record.id, "Stale pending upload failed");
                    if let Err(e) = self.store.delete(&record.storage_key).await {
                        tracing::warn!(upload_id = %record.id, error = %e, "Could not delete stale blob");
                    }
                }
                // Confirmed (or failed) between the scan and the update.
                Err(MetadataError::InvalidTransition { .. }) => report.skipped += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if report.failed > 0 {
            metrics::counter!("uploads_reconciled_total").increment(report.failed as u64);
        }
        Ok(report)
    }

    /// Operator re-drive: clear a `failed` derivative and publish the event again.
    pub async fn redrive_derivative(&self, id: Uuid, kind: DerivativeKind) -> Result<PublishOutcome, AppError> {
        let record = self.get(id).await?;
        if record.status != UploadStatus::Uploaded {
            return Err(AppError::InvalidTransition(format!(
                "upload {id} is {}, not uploaded",
                record.status
            )));
        }

        if !self.derivatives.reset_failed(id, kind).await? {
            return Err(AppError::InvalidTransition(format!(
                "upload {id} has no failed {kind} derivative"
            )));
        }

        tracing::info!(upload_id = %id, kind = %kind, "Derivative reset by operator, re-publishing");
        match self.publisher.publish(&record).await {
            outcome @ PublishOutcome::Delivered { .. } => Ok(outcome),
            outcome => Err(AppError::PublishFailure(format!(
                "re-drive of upload {id} not delivered: {outcome:?}"
            ))),
        }
    }
}

fn validate_upload_fields(filename: &str, content_type: &str) -> Result<(), AppError> {
    if filename.trim().is_empty() || filename.len() > 255 {
        return Err(AppError::InvalidInput("filename must be 1-255 bytes".to_string()));
    }
    is_mime_type(content_type, &()).map_err(|e| AppError::InvalidInput(e.to_string()))
}

/// `uploads/{uuid}_{sanitized name}`; unique per reservation.
pub fn storage_key_for(filename: &str) -> String {
    format!("uploads/{}_{}", Uuid::new_v4(), sanitize_filename(filename))
}

fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_NAME_LEN)
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
