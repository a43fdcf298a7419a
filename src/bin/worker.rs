use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use upload_pipeline::{
    config::AppConfig,
    db,
    services::{
        callback::CallbackNotifier,
        consumer::{ConsumeOutcome, DerivativeConsumer},
        derivatives::PgDerivativeStore,
        queue::{NackOutcome, QueueError, RedisEventLog, Subscription},
        retry::RetryPolicy,
        storage::{S3ObjectStore, S3Settings},
        thumbnail::ThumbnailGenerator,
    },
};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);
const REDELIVERY_BACKOFF_BASE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting derivative worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("WORKER_METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");
    tracing::info!(addr = %metrics_addr, "Serving worker metrics");

    metrics::describe_counter!("derivatives_succeeded_total", "Derivatives generated and recorded");
    metrics::describe_counter!("derivatives_failed_total", "Derivative generations recorded as failed");
    metrics::describe_counter!(
        "derivative_duplicates_total",
        "Deliveries acknowledged because a derivative was already recorded"
    );
    metrics::describe_histogram!(
        "derivative_processing_seconds",
        metrics::Unit::Seconds,
        "Download, generate and upload time per derivative"
    );
    metrics::describe_counter!(
        "upload_events_consumer_dead_lettered_total",
        "Events moved to the consumer dead list after the delivery limit"
    );
    metrics::describe_gauge!("upload_events_queue_depth", "Events waiting across the worker's partitions");
    metrics::describe_gauge!("upload_events_consumer_dead_letters", "Events in the consumer dead list");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    let store = S3ObjectStore::new(
        S3Settings {
            bucket: &config.s3_bucket,
            endpoint: &config.s3_endpoint,
            region: &config.s3_region,
            access_key: &config.s3_access_key,
            secret_key: &config.s3_secret_key,
            path_style: config.s3_path_style,
        },
        config.storage_timeout(),
        config.storage_retry(),
    )
    .expect("Failed to initialize object storage client");

    let mut consumer = DerivativeConsumer::new(
        Arc::new(store),
        Arc::new(PgDerivativeStore::new(db_pool)),
        Arc::new(ThumbnailGenerator::new(config.thumbnail_width, config.thumbnail_height)),
    );
    if let Some(url) = config.callback_url.clone() {
        tracing::info!(url = %url, "Derivative callbacks enabled");
        let notifier =
            CallbackNotifier::new(url, CALLBACK_TIMEOUT).expect("Failed to build callback client");
        consumer = consumer.with_notifier(notifier);
    }

    let event_log = RedisEventLog::new(
        &config.redis_url,
        config.event_topics.clone(),
        config.event_log_partitions,
    )
    .expect("Failed to initialize event log");
    let mut subscription = event_log.subscribe(&config.worker_topic, config.consumer_max_deliveries);

    match subscription.recover_in_flight().await {
        Ok(0) => {}
        Ok(recovered) => tracing::warn!(recovered, topic = %subscription.topic(), "Redelivering in-flight events"),
        Err(e) => tracing::error!(error = %e, "Could not recover in-flight events"),
    }

    let backoff = RetryPolicy::new(config.consumer_max_deliveries, REDELIVERY_BACKOFF_BASE);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    tracing::info!(
        topic = %subscription.topic(),
        kind = %consumer.kind(),
        "Worker ready, starting event loop"
    );

    loop {
        match process_next_event(&consumer, &mut subscription, &backoff).await {
            Ok(true) => tracing::debug!("Event handled, checking for next"),
            Ok(false) => {
                tracing::trace!("No events available, sleeping");
                report_depth(&subscription).await;
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Event log error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Handle the next event. Returns Ok(false) when every partition is empty.
async fn process_next_event(
    consumer: &DerivativeConsumer,
    subscription: &mut Subscription,
    backoff: &RetryPolicy,
) -> Result<bool, QueueError> {
    let Some(delivery) = subscription.next().await? else {
        return Ok(false);
    };

    tracing::info!(
        upload_id = %delivery.event.record_id,
        storage_key = %delivery.event.storage_key,
        attempt = delivery.attempt,
        "Processing upload event"
    );

    match consumer.on_event(&delivery.event).await {
        Ok(outcome) => {
            subscription.ack(&delivery).await?;
            match outcome {
                ConsumeOutcome::Processed(record) => {
                    tracing::info!(upload_id = %record.upload_id, artifact_key = %record.artifact_key, "Event processed")
                }
                ConsumeOutcome::Duplicate(record) => {
                    tracing::info!(upload_id = %record.upload_id, status = %record.status, "Duplicate event acknowledged")
                }
                ConsumeOutcome::Skipped => {
                    tracing::debug!(upload_id = %delivery.event.record_id, "Event skipped")
                }
            }
        }
        Err(e) => {
            let delay = backoff.delay_for(delivery.attempt);
            tracing::warn!(
                upload_id = %delivery.event.record_id,
                attempt = delivery.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Event processing failed, returning for redelivery"
            );
            sleep(delay).await;

            if subscription.nack(&delivery).await? == NackOutcome::DeadLettered {
                metrics::counter!("upload_events_consumer_dead_lettered_total").increment(1);
                tracing::error!(
                    upload_id = %delivery.event.record_id,
                    attempts = delivery.attempt,
                    "Delivery limit reached, event moved to dead-letter list"
                );
            }
        }
    }

    Ok(true)
}

async fn report_depth(subscription: &Subscription) {
    if let Ok(depth) = subscription.queue_depth().await {
        metrics::gauge!("upload_events_queue_depth").set(depth as f64);
    }
    if let Ok(dead) = subscription.dead_letter_depth().await {
        metrics::gauge!("upload_events_consumer_dead_letters").set(dead as f64);
    }
}
