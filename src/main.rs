use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use upload_pipeline::{
    app_state::{AppState, Components},
    config::AppConfig,
    db, routes,
    services::{
        dead_letters::{DeadLetterLog, PgDeadLetterLog},
        derivatives::PgDerivativeStore,
        metadata::PgMetadataStore,
        publisher::EventPublisher,
        queue::RedisEventLog,
        storage::{S3ObjectStore, S3Settings},
        uploads::{UploadService, UploadSettings},
    },
};

const REDRIVE_BATCH: usize = 100;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing upload-pipeline API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("uploads_presigned_total", "Upload slots reserved via presigned URL");
    metrics::describe_counter!("uploads_confirmed_total", "Uploads moved from pending to uploaded");
    metrics::describe_counter!(
        "uploads_confirm_conflicts_total",
        "Confirmations rejected because the upload was not pending"
    );
    metrics::describe_counter!("uploads_reconciled_total", "Stale pending uploads marked failed");
    metrics::describe_counter!("upload_events_published_total", "Upload events appended to the event log");
    metrics::describe_counter!("upload_events_publish_retries_total", "Event log append retries");
    metrics::describe_counter!(
        "upload_events_dead_lettered_total",
        "Upload events written to the dead-letter log after retries ran out"
    );
    metrics::describe_counter!(
        "upload_events_lost_total",
        "Upload events that could be neither appended nor dead-lettered"
    );
    metrics::describe_counter!("upload_events_redriven_total", "Dead-lettered events re-appended");
    metrics::describe_gauge!("upload_events_dead_letters_pending", "Dead letters awaiting re-drive");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(bucket = %config.s3_bucket, endpoint = %config.s3_endpoint, "Initializing object storage client");
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

    tracing::info!(topics = ?config.event_topics, partitions = config.event_log_partitions, "Connecting to Redis event log");
    let event_log = RedisEventLog::new(
        &config.redis_url,
        config.event_topics.clone(),
        config.event_log_partitions,
    )
    .expect("Failed to initialize event log");

    let dead_letters: Arc<dyn DeadLetterLog> = Arc::new(PgDeadLetterLog::new(db_pool.clone()));

    let state = AppState::new(
        Components {
            metadata: Arc::new(PgMetadataStore::new(db_pool.clone())),
            store: Arc::new(store),
            derivatives: Arc::new(PgDerivativeStore::new(db_pool.clone())),
            event_log: Arc::new(event_log),
            dead_letters: Arc::clone(&dead_letters),
        },
        UploadSettings {
            presign_expiry: Duration::from_secs(u64::from(config.presign_expiry_secs)),
            download_url_expiry: Duration::from_secs(u64::from(config.download_url_expiry_secs)),
            max_upload_bytes: config.max_upload_bytes,
        },
        config.publish_retry(),
    );

    tokio::spawn(reconcile_loop(
        Arc::clone(&state.uploads),
        config.pending_ttl(),
        Duration::from_secs(config.reconcile_interval_secs),
    ));
    tokio::spawn(redrive_loop(
        Arc::clone(&state.publisher),
        dead_letters,
        Duration::from_secs(config.reconcile_interval_secs),
    ));

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::body_limit(
            config.max_upload_bytes,
        )));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Fail uploads that stayed `pending` past their TTL.
async fn reconcile_loop(uploads: Arc<UploadService>, pending_ttl: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match uploads.reconcile_stale(pending_ttl).await {
            Ok(report) if report.failed > 0 || report.skipped > 0 => {
                tracing::info!(failed = report.failed, skipped = report.skipped, "Pending uploads reconciled");
            }
            Ok(_) => tracing::trace!("No stale pending uploads"),
            Err(e) => tracing::error!(error = %e, "Reconcile sweep failed"),
        }
    }
}

/// Periodically retry dead-lettered upload events.
async fn redrive_loop(publisher: Arc<EventPublisher>, dead_letters: Arc<dyn DeadLetterLog>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match dead_letters.pending_count().await {
            Ok(0) => {
                metrics::gauge!("upload_events_dead_letters_pending").set(0.0);
                continue;
            }
            Ok(count) => metrics::gauge!("upload_events_dead_letters_pending").set(count as f64),
            Err(e) => {
                tracing::error!(error = %e, "Could not count dead letters");
                continue;
            }
        }

        match publisher.redrive_dead_letters(REDRIVE_BATCH).await {
            Ok(report) => tracing::info!(
                redriven = report.redriven,
                failed = report.failed,
                remaining = report.remaining,
                "Dead-letter re-drive pass finished"
            ),
            Err(e) => tracing::error!(error = %e, "Dead-letter re-drive failed"),
        }
    }
}
