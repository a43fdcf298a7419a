use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::models::event::UploadEvent;
use crate::models::upload::{UploadRecord, UploadStatus};
use crate::services::dead_letters::DeadLetterLog;
use crate::services::queue::{EventLog, QueueError};
use crate::services::retry::{retry_with_backoff, RetryPolicy};

/// What happened to a publish. Never an error: the metadata commit that
/// preceded it stands regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { attempts: u32 },
    /// Retries exhausted; the event is in the dead-letter log.
    DeadLettered { attempts: u32 },
    /// Retries exhausted and the dead-letter write failed too.
    Lost { attempts: u32 },
    /// The record is not `uploaded`; nothing was appended.
    NotUploaded,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveReport {
    pub redriven: usize,
    pub failed: usize,
    pub remaining: u64,
}

/// At-least-once publisher of upload events.
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    dead_letters: Arc<dyn DeadLetterLog>,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(log: Arc<dyn EventLog>, dead_letters: Arc<dyn DeadLetterLog>, retry: RetryPolicy) -> Self {
        Self {
            log,
            dead_letters,
            retry,
        }
    }

    /// Publish the event for a record whose `uploaded` status is already committed.
    pub async fn publish(&self, record: &UploadRecord) -> PublishOutcome {
        if record.status != UploadStatus::Uploaded {
            tracing::error!(
                upload_id = %record.id,
                status = %record.status,
                "Refusing to publish event for upload that is not uploaded"
            );
            return PublishOutcome::NotUploaded;
        }

        self.publish_event(&UploadEvent::from(record)).await
    }

    /// Append with retries; dead-letter on exhaustion.
    pub async fn publish_event(&self, event: &UploadEvent) -> PublishOutcome {
        match self.deliver(event).await {
            Ok(attempts) => {
                metrics::counter!("upload_events_published_total").increment(1);
                tracing::info!(upload_id = %event.record_id, attempts, "Upload event published");
                PublishOutcome::Delivered { attempts }
            }
            Err((e, attempts)) => {
                tracing::error!(
                    upload_id = %event.record_id,
                    attempts,
                    error = %e,
                    "Publish retries exhausted, writing dead letter"
                );
                match self.dead_letters.record(event, &e.to_string(), attempts).await {
                    Ok(id) => {
                        metrics::counter!("upload_events_dead_lettered_total").increment(1);
                        tracing::warn!(upload_id = %event.record_id, dead_letter_id = %id, "Upload event dead-lettered");
                        PublishOutcome::DeadLettered { attempts }
                    }
                    Err(db_err) => {
                        metrics::counter!("upload_events_lost_total").increment(1);
                        tracing::error!(
                            upload_id = %event.record_id,
                            error = %db_err,
                            "Failed to write dead letter, event lost until reconciliation"
                        );
                        PublishOutcome::Lost { attempts }
                    }
                }
            }
        }
    }

    /// Re-append up to `limit` dead letters, oldest first. Stops at the first
    /// delivery failure since the log is most likely still down.
    pub async fn redrive_dead_letters(&self, limit: usize) -> Result<RedriveReport, sqlx::Error> {
        let mut report = RedriveReport::default();

        for letter in self.dead_letters.pending(limit).await? {
            match self.deliver(&letter.event).await {
                Ok(_) => {
                    self.dead_letters.mark_redriven(letter.id).await?;
                    report.redriven += 1;
                    tracing::info!(
                        upload_id = %letter.event.record_id,
                        dead_letter_id = %letter.id,
                        "Dead letter re-driven"
                    );
                }
                Err((e, _)) => {
                    report.failed += 1;
                    tracing::warn!(dead_letter_id = %letter.id, error = %e, "Re-drive failed, stopping");
                    break;
                }
            }
        }

        report.remaining = self.dead_letters.pending_count().await?;
        metrics::counter!("upload_events_redriven_total").increment(report.redriven as u64);
        Ok(report)
    }

    /// Returns the number of attempts used, or the last error with it.
    async fn deliver(&self, event: &UploadEvent) -> Result<u32, (QueueError, u32)> {
        let attempts = AtomicU32::new(0);
        let log = &self.log;
        let counter = &attempts;

        let result = retry_with_backoff(&self.retry, "publish upload event", |_| true, || async move {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                metrics::counter!("upload_events_publish_retries_total").increment(1);
            }
            log.append(event).await
        })
        .await;

        let used = attempts.load(Ordering::SeqCst);
        result.map(|()| used).map_err(|e| (e, used))
    }
}
