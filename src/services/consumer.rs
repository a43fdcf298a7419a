use std::sync::Arc;

use crate::models::derivative::{DerivativeKind, DerivativeRecord, DerivativeStatus, NewDerivative};
use crate::models::event::UploadEvent;
use crate::services::callback::CallbackNotifier;
use crate::services::derivatives::{DerivativeError, DerivativeStore};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::thumbnail::{DerivativeGenerator, GenerateError};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// Work done; the `success` record now exists.
    Processed(DerivativeRecord),
    /// A record already existed for this `(upload, kind)`; nothing was done.
    Duplicate(DerivativeRecord),
    /// The generator does not handle this content type.
    Skipped,
}

/// Idempotent handler turning upload events into derivative artifacts.
pub struct DerivativeConsumer {
    store: Arc<dyn ObjectStore>,
    derivatives: Arc<dyn DerivativeStore>,
    generator: Arc<dyn DerivativeGenerator>,
    notifier: Option<CallbackNotifier>,
}

impl DerivativeConsumer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        derivatives: Arc<dyn DerivativeStore>,
        generator: Arc<dyn DerivativeGenerator>,
    ) -> Self {
        Self {
            store,
            derivatives,
            generator,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: CallbackNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn kind(&self) -> DerivativeKind {
        self.generator.kind()
    }

    /// Handle one delivery. Errors are recorded as a `failed` derivative and
    /// then returned so the delivery is not acknowledged.
    pub async fn on_event(&self, event: &UploadEvent) -> Result<ConsumeOutcome, ConsumerError> {
        let kind = self.generator.kind();

        if let Some(existing) = self.derivatives.find(event.record_id, kind).await? {
            tracing::info!(
                upload_id = %event.record_id,
                kind = %kind,
                status = %existing.status,
                "Derivative already recorded, skipping duplicate delivery"
            );
            metrics::counter!("derivative_duplicates_total").increment(1);
            return Ok(ConsumeOutcome::Duplicate(existing));
        }

        if !self.generator.supports(&event.content_type) {
            tracing::debug!(
                upload_id = %event.record_id,
                content_type = %event.content_type,
                kind = %kind,
                "Content type not handled"
            );
            return Ok(ConsumeOutcome::Skipped);
        }

        let artifact_key = self.generator.artifact_key(event);
        let start = std::time::Instant::now();

        match self.produce(event, &artifact_key).await {
            Ok(()) => {
                let record = self
                    .derivatives
                    .insert(NewDerivative {
                        upload_id: event.record_id,
                        kind,
                        artifact_key,
                        status: DerivativeStatus::Success,
                        error: None,
                    })
                    .await?;

                // Another delivery recorded this pair after our duplicate check.
                if record.status != DerivativeStatus::Success {
                    tracing::info!(
                        upload_id = %event.record_id,
                        kind = %kind,
                        status = %record.status,
                        "Derivative recorded concurrently, treating delivery as duplicate"
                    );
                    metrics::counter!("derivative_duplicates_total").increment(1);
                    return Ok(ConsumeOutcome::Duplicate(record));
                }

                metrics::counter!("derivatives_succeeded_total").increment(1);
                metrics::histogram!("derivative_processing_seconds").record(start.elapsed().as_secs_f64());
                tracing::info!(
                    upload_id = %event.record_id,
                    kind = %kind,
                    artifact_key = %record.artifact_key,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Derivative created"
                );

                if let Some(notifier) = &self.notifier {
                    if let Err(e) = notifier.notify(&record).await {
                        tracing::warn!(
                            upload_id = %event.record_id,
                            url = %notifier.url(),
                            error = %e,
                            "Derivative callback failed"
                        );
                    }
                }

                Ok(ConsumeOutcome::Processed(record))
            }
            Err(e) => {
                metrics::counter!("derivatives_failed_total").increment(1);
                tracing::error!(upload_id = %event.record_id, kind = %kind, error = %e, "Derivative generation failed");

                let failed = NewDerivative {
                    upload_id: event.record_id,
                    kind,
                    artifact_key,
                    status: DerivativeStatus::Failed,
                    error: Some(e.to_string()),
                };
                if let Err(db_err) = self.derivatives.insert(failed).await {
                    tracing::error!(
                        upload_id = %event.record_id,
                        error = %db_err,
                        "Could not record failed derivative"
                    );
                }

                Err(e)
            }
        }
    }

    async fn produce(&self, event: &UploadEvent, artifact_key: &str) -> Result<(), ConsumerError> {
        let original = self.store.download(&event.storage_key).await?;

        let generator = Arc::clone(&self.generator);
        let derived = tokio::task::spawn_blocking(move || generator.generate(&original))
            .await
            .map_err(|e| ConsumerError::Join(e.to_string()))??;

        self.store
            .upload(artifact_key, &derived.bytes, &derived.content_type)
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("generation: {0}")]
    Generate(#[from] GenerateError),

    #[error("derivative store: {0}")]
    Derivatives(#[from] DerivativeError),

    #[error("processing task aborted: {0}")]
    Join(String),
}
