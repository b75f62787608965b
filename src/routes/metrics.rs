use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the pipeline's metrics. Shared by the API and
/// the worker so both expose the same catalogue.
pub fn describe_metrics() {
    metrics::describe_counter!("image_jobs_submitted_total", "Jobs admitted by the API");
    metrics::describe_counter!(
        "image_jobs_completed_total",
        "Jobs that reached completed, including partial successes"
    );
    metrics::describe_counter!(
        "image_jobs_failed_total",
        "Jobs that failed on source acquisition or deadline"
    );
    metrics::describe_counter!(
        "image_jobs_dropped_total",
        "Queue messages dropped because they did not decode"
    );
    metrics::describe_counter!(
        "image_operations_failed_total",
        "Operations skipped, labelled by failure reason"
    );
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Time from dequeue to terminal status"
    );
    metrics::describe_gauge!("image_queue_depth", "Jobs waiting in the queue");
}

/// GET /metrics — Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
