use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use image_pipeline::app_state::AppState;
use image_pipeline::config::AppConfig;
use image_pipeline::routes;
use image_pipeline::services::{
    bootstrap::{connect_with_retry, RetryPolicy},
    queue::{JobQueue, MessageQueue},
    status::{RedisStatusStore, StatusStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-pipeline API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to Redis");
    // The API only enqueues, so its in-flight list is never used.
    let queue = JobQueue::new(&config.redis_url, "api")
        .expect("Failed to initialize job queue");
    let status = RedisStatusStore::new(&config.redis_url, config.status_ttl())
        .expect("Failed to initialize status store");

    let policy = RetryPolicy {
        max_attempts: config.bootstrap_max_attempts,
        delay: config.bootstrap_retry_delay(),
    };
    if let Err(e) = connect_with_retry("redis queue", policy, || queue.health_check()).await {
        tracing::error!(error = %e, "Queue unavailable, exiting");
        std::process::exit(1);
    }
    if let Err(e) = connect_with_retry("status store", policy, || status.health_check()).await {
        tracing::error!(error = %e, "Status store unavailable, exiting");
        std::process::exit(1);
    }

    let state = AppState::new(Arc::new(status), Arc::new(queue));

    let app = routes::api_router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("API listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
