//! In-memory backends and wiring for pipeline tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use upload_pipeline::app_state::{AppState, Components};
use upload_pipeline::models::dead_letter::DeadLetter;
use upload_pipeline::models::derivative::{DerivativeKind, DerivativeRecord, NewDerivative};
use upload_pipeline::models::event::UploadEvent;
use upload_pipeline::models::upload::{NewUpload, UploadRecord, UploadStatus};
use upload_pipeline::services::consumer::{ConsumeOutcome, ConsumerError, DerivativeConsumer};
use upload_pipeline::services::dead_letters::DeadLetterLog;
use upload_pipeline::services::derivatives::{DerivativeError, DerivativeStore};
use upload_pipeline::services::metadata::{MetadataError, MetadataStore};
use upload_pipeline::services::queue::{EventLog, QueueError};
use upload_pipeline::services::retry::RetryPolicy;
use upload_pipeline::services::storage::{ObjectStore, StorageError};
use upload_pipeline::services::thumbnail::ThumbnailGenerator;
use upload_pipeline::services::uploads::UploadSettings;

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// What a client holding a presigned PUT URL would do.
    pub fn put(&self, key: &str, data: &[u8], content_type: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        self.check()?;
        if data.is_empty() {
            return Err(StorageError::InvalidInput("empty upload".to_string()));
        }
        self.put(key, data, content_type);
        Ok(key.to_string())
    }

    async fn presign_upload(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        self.check()?;
        Ok(format!(
            "http://objects.test/bucket/{key}?X-Amz-Expires={}&X-Amz-Signature=put",
            expiry.as_secs()
        ))
    }

    async fn presign_download(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        self.check()?;
        Ok(format!(
            "http://objects.test/bucket/{key}?X-Amz-Expires={}&X-Amz-Signature=get",
            expiry.as_secs()
        ))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        self.get(key)
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Metadata store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<Uuid, UploadRecord>>,
    failing_creates: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn set_failing_creates(&self, failing: bool) {
        self.failing_creates.store(failing, Ordering::SeqCst);
    }

    /// Pretend a record was created `age` ago.
    pub fn backdate(&self, id: Uuid, age: Duration) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&id) {
            record.created_at = Utc::now() - ChronoDuration::from_std(age).unwrap();
        }
    }

    pub fn status_of(&self, id: Uuid) -> Option<UploadStatus> {
        self.records.lock().unwrap().get(&id).map(|r| r.status)
    }

    fn transition(
        &self,
        id: Uuid,
        to: UploadStatus,
        allowed_from: impl Fn(UploadStatus) -> bool,
        apply: impl FnOnce(&mut UploadRecord),
    ) -> Result<UploadRecord, MetadataError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(MetadataError::NotFound(id))?;
        if !allowed_from(record.status) {
            return Err(MetadataError::InvalidTransition {
                id,
                from: record.status,
                to,
            });
        }
        record.status = to;
        record.updated_at = Utc::now();
        apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, new: NewUpload) -> Result<UploadRecord, MetadataError> {
        if self.failing_creates.load(Ordering::SeqCst) {
            return Err(MetadataError::Database(sqlx::Error::PoolTimedOut));
        }
        let now = Utc::now();
        let record = UploadRecord {
            id: Uuid::new_v4(),
            original_name: new.original_name,
            storage_key: new.storage_key,
            content_type: new.content_type,
            size: 0,
            status: UploadStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn mark_uploaded(&self, id: Uuid, size: i64, content_type: &str) -> Result<UploadRecord, MetadataError> {
        self.transition(id, UploadStatus::Uploaded, |from| from == UploadStatus::Pending, |record| {
            record.size = size;
            record.content_type = content_type.to_string();
        })
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError> {
        let from_live = |from: UploadStatus| matches!(from, UploadStatus::Pending | UploadStatus::Uploaded);
        self.transition(id, UploadStatus::Failed, from_live, |record| {
            record.failure_reason = Some(reason.to_string());
        })
    }

    async fn expire_pending(&self, id: Uuid, reason: &str) -> Result<UploadRecord, MetadataError> {
        self.transition(
            id,
            UploadStatus::Failed,
            |from| from == UploadStatus::Pending,
            |record| record.failure_reason = Some(reason.to_string()),
        )
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>, MetadataError> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn find_pending(&self, older_than: Duration) -> Result<Vec<UploadRecord>, MetadataError> {
        let cutoff = Utc::now() - ChronoDuration::from_std(older_than).unwrap();
        let mut stale: Vec<UploadRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == UploadStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        Ok(stale)
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Derivative store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDerivativeStore {
    records: Mutex<HashMap<(Uuid, DerivativeKind), DerivativeRecord>>,
}

impl MemoryDerivativeStore {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl DerivativeStore for MemoryDerivativeStore {
    async fn find(&self, upload_id: Uuid, kind: DerivativeKind) -> Result<Option<DerivativeRecord>, DerivativeError> {
        Ok(self.records.lock().unwrap().get(&(upload_id, kind)).cloned())
    }

    async fn insert(&self, new: NewDerivative) -> Result<DerivativeRecord, DerivativeError> {
        let mut records = self.records.lock().unwrap();
        let stored = records
            .entry((new.upload_id, new.kind))
            .or_insert_with(|| DerivativeRecord {
                id: Uuid::new_v4(),
                upload_id: new.upload_id,
                kind: new.kind,
                artifact_key: new.artifact_key,
                status: new.status,
                error: new.error,
                created_at: Utc::now(),
            });
        Ok(stored.clone())
    }

    async fn list_for_upload(&self, upload_id: Uuid) -> Result<Vec<DerivativeRecord>, DerivativeError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.upload_id == upload_id)
            .cloned()
            .collect())
    }

    async fn reset_failed(&self, upload_id: Uuid, kind: DerivativeKind) -> Result<bool, DerivativeError> {
        let mut records = self.records.lock().unwrap();
        let failed = records
            .get(&(upload_id, kind))
            .is_some_and(|r| r.status == upload_pipeline::models::derivative::DerivativeStatus::Failed);
        if failed {
            records.remove(&(upload_id, kind));
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEventLog {
    appended: Mutex<Vec<UploadEvent>>,
    failures_remaining: AtomicU32,
    append_calls: AtomicU32,
}

impl MemoryEventLog {
    /// Fail the next `n` appends.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<UploadEvent> {
        self.appended.lock().unwrap().clone()
    }

    pub fn events_for(&self, id: Uuid) -> usize {
        self.appended
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.record_id == id)
            .count()
    }

    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &UploadEvent) -> Result<(), QueueError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "broker unreachable",
            ))));
        }
        self.appended.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dead-letter log
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDeadLetterLog {
    letters: Mutex<Vec<DeadLetter>>,
    unavailable: AtomicBool,
}

impl MemoryDeadLetterLog {
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterLog for MemoryDeadLetterLog {
    async fn record(&self, event: &UploadEvent, error: &str, attempts: u32) -> Result<Uuid, sqlx::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let letter = DeadLetter {
            id: Uuid::new_v4(),
            event: event.clone(),
            error: error.to_string(),
            attempts: attempts as i32,
            created_at: Utc::now(),
            redriven_at: None,
        };
        let id = letter.id;
        self.letters.lock().unwrap().push(letter);
        Ok(id)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<DeadLetter>, sqlx::Error> {
        Ok(self
            .letters
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.redriven_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<u64, sqlx::Error> {
        Ok(self
            .letters
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.redriven_at.is_none())
            .count() as u64)
    }

    async fn mark_redriven(&self, id: Uuid) -> Result<(), sqlx::Error> {
        if let Some(letter) = self.letters.lock().unwrap().iter_mut().find(|l| l.id == id) {
            letter.redriven_at = Some(Utc::now());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;
pub const PUBLISH_ATTEMPTS: u32 = 3;

/// A whole pipeline over in-memory backends: API state plus one consumer.
pub struct Harness {
    pub metadata: Arc<MemoryMetadataStore>,
    pub store: Arc<MemoryObjectStore>,
    pub derivatives: Arc<MemoryDerivativeStore>,
    pub event_log: Arc<MemoryEventLog>,
    pub dead_letters: Arc<MemoryDeadLetterLog>,
    pub state: AppState,
    pub consumer: DerivativeConsumer,
    consumed: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        let metadata = Arc::new(MemoryMetadataStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let derivatives = Arc::new(MemoryDerivativeStore::default());
        let event_log = Arc::new(MemoryEventLog::default());
        let dead_letters = Arc::new(MemoryDeadLetterLog::default());

        let state = AppState::new(
            Components {
                metadata: metadata.clone(),
                store: store.clone(),
                derivatives: derivatives.clone(),
                event_log: event_log.clone(),
                dead_letters: dead_letters.clone(),
            },
            UploadSettings {
                presign_expiry: Duration::from_secs(900),
                download_url_expiry: Duration::from_secs(3600),
                max_upload_bytes: MAX_UPLOAD_BYTES,
            },
            RetryPolicy::new(PUBLISH_ATTEMPTS, Duration::from_millis(1)),
        );

        let consumer = DerivativeConsumer::new(
            store.clone(),
            derivatives.clone(),
            Arc::new(ThumbnailGenerator::new(200, 200)),
        );

        Self {
            metadata,
            store,
            derivatives,
            event_log,
            dead_letters,
            state,
            consumer,
            consumed: AtomicUsize::new(0),
        }
    }

    /// Feed every event appended since the last call to the consumer, in order.
    pub async fn consume_new(&self) -> Vec<Result<ConsumeOutcome, ConsumerError>> {
        let events = self.event_log.events();
        let start = self.consumed.swap(events.len(), Ordering::SeqCst);
        let mut outcomes = Vec::new();
        for event in &events[start..] {
            outcomes.push(self.consumer.on_event(event).await);
        }
        outcomes
    }

    /// Presign, simulate the client PUT, then confirm.
    pub async fn upload_via_presign(&self, filename: &str, content_type: &str, data: &[u8]) -> UploadRecord {
        let presigned = self
            .state
            .uploads
            .presign(filename, content_type)
            .await
            .expect("presign");
        self.store.put(&presigned.storage_key, data, content_type);
        self.state
            .uploads
            .confirm_upload(presigned.id, data.len() as i64, content_type)
            .await
            .expect("confirm")
    }
}

/// A synthetic PNG with a gradient so it is not trivially compressible.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
