use serde::Deserialize;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the event log
    pub redis_url: String,

    /// Bucket name
    pub s3_bucket: String,

    /// S3-compatible endpoint URL (MinIO, R2, ...)
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Path-style addressing, required by MinIO.
    #[serde(default = "default_true")]
    pub s3_path_style: bool,

    /// Lifetime of presigned PUT URLs.
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u32,

    /// Default lifetime of presigned GET URLs.
    #[serde(default = "default_download_url_expiry_secs")]
    pub download_url_expiry_secs: u32,

    /// Per-call timeout for object store requests.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    #[serde(default = "default_storage_max_attempts")]
    pub storage_max_attempts: u32,

    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,

    #[serde(default = "default_publish_backoff_base_ms")]
    pub publish_backoff_base_ms: u64,

    /// Topics every upload event is appended to, one per consumer group.
    #[serde(default = "default_event_topics")]
    pub event_topics: Vec<String>,

    /// Topic the worker subscribes to.
    #[serde(default = "default_worker_topic")]
    pub worker_topic: String,

    /// Events are routed to partition `record_id mod event_log_partitions`.
    #[serde(default = "default_event_log_partitions")]
    pub event_log_partitions: u32,

    /// Deliveries of one event before the consumer dead-letters it.
    #[serde(default = "default_consumer_max_deliveries")]
    pub consumer_max_deliveries: u32,

    /// Address the worker serves Prometheus metrics on.
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,

    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,

    /// Optional URL notified with each successful derivative record.
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Pending uploads older than this are failed by the reconciliation sweep.
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    20
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_presign_expiry_secs() -> u32 {
    15 * 60
}

fn default_download_url_expiry_secs() -> u32 {
    3600
}

fn default_storage_timeout_ms() -> u64 {
    10_000
}

fn default_storage_max_attempts() -> u32 {
    3
}

fn default_publish_max_attempts() -> u32 {
    5
}

fn default_publish_backoff_base_ms() -> u64 {
    100
}

fn default_event_topics() -> Vec<String> {
    vec!["upload-events".to_string()]
}

fn default_worker_topic() -> String {
    "upload-events".to_string()
}

fn default_event_log_partitions() -> u32 {
    1
}

fn default_consumer_max_deliveries() -> u32 {
    5
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_thumbnail_width() -> u32 {
    200
}

fn default_thumbnail_height() -> u32 {
    200
}

fn default_pending_ttl_secs() -> u64 {
    24 * 3600
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn storage_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.storage_max_attempts, Duration::from_millis(200))
    }

    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_max_attempts,
            Duration::from_millis(self.publish_backoff_base_ms),
        )
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}
