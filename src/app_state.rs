use std::sync::Arc;

use crate::services::{
    dead_letters::DeadLetterLog,
    derivatives::DerivativeStore,
    metadata::MetadataStore,
    publisher::EventPublisher,
    queue::EventLog,
    retry::RetryPolicy,
    storage::ObjectStore,
    uploads::{UploadService, UploadSettings},
};

/// The pluggable backends the API process is composed from.
pub struct Components {
    pub metadata: Arc<dyn MetadataStore>,
    pub store: Arc<dyn ObjectStore>,
    pub derivatives: Arc<dyn DerivativeStore>,
    pub event_log: Arc<dyn EventLog>,
    pub dead_letters: Arc<dyn DeadLetterLog>,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub publisher: Arc<EventPublisher>,
    pub metadata: Arc<dyn MetadataStore>,
    pub event_log: Arc<dyn EventLog>,
}

impl AppState {
    pub fn new(components: Components, settings: UploadSettings, publish_retry: RetryPolicy) -> Self {
        let publisher = Arc::new(EventPublisher::new(
            Arc::clone(&components.event_log),
            components.dead_letters,
            publish_retry,
        ));

        let uploads = Arc::new(UploadService::new(
            Arc::clone(&components.metadata),
            components.store,
            components.derivatives,
            Arc::clone(&publisher),
            settings,
        ));

        Self {
            uploads,
            publisher,
            metadata: components.metadata,
            event_log: components.event_log,
        }
    }
}
