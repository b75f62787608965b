use image_pipeline::{
    config::AppConfig,
    routes::metrics::describe_metrics,
    services::{
        bootstrap::{connect_with_retry, BootstrapError, RetryPolicy},
        queue::{JobQueue, MessageQueue},
        sink::ResultSink,
        source::SourceAcquirer,
        status::{RedisStatusStore, StatusStore},
        storage::{ObjectStore, S3Store},
        transform::TransformPipeline,
        worker::{Worker, WorkerSettings},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image processing worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    // Initialize services
    let identity = config.worker_identity();
    if !identity.recover_in_flight {
        tracing::warn!(
            worker_id = %identity.id,
            "WORKER_ID not set, using a generated id; jobs in flight when this process dies will not be redelivered"
        );
    }
    tracing::info!(worker_id = %identity.id, "Initializing services");
    let queue = JobQueue::new(&config.redis_url, &identity.id)
        .expect("Failed to initialize job queue");
    let status = RedisStatusStore::new(&config.redis_url, config.status_ttl())
        .expect("Failed to initialize status store");
    let objects = S3Store::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.storage_timeout(),
    )
    .expect("Failed to initialize object store client");

    let policy = RetryPolicy {
        max_attempts: config.bootstrap_max_attempts,
        delay: config.bootstrap_retry_delay(),
    };
    let ready = async {
        connect_with_retry("redis queue", policy, || queue.health_check()).await?;
        connect_with_retry("status store", policy, || status.health_check()).await?;
        connect_with_retry("object store", policy, || objects.health_check()).await?;
        Ok::<_, BootstrapError>(())
    };
    if let Err(e) = ready.await {
        tracing::error!(error = %e, "Startup dependency unavailable, exiting");
        std::process::exit(1);
    }

    let objects: Arc<dyn ObjectStore> = Arc::new(objects);
    let acquirer = SourceAcquirer::new(
        objects.clone(),
        config.source_fetch_timeout(),
        config.max_source_bytes,
    )
    .expect("Failed to initialize source acquirer");
    let pipeline = TransformPipeline::new(
        ResultSink::new(objects, config.public_base_url.clone()),
        config.max_output_dimension,
    );

    let worker = Worker::new(
        Arc::new(queue),
        Arc::new(status),
        acquirer,
        pipeline,
        WorkerSettings {
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
            recover_in_flight: identity.recover_in_flight,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current job");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
}
