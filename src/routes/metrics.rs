use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the metrics the service emits.
pub fn describe() {
    metrics::describe_counter!("analysis_jobs_submitted_total", "Analyses accepted for processing");
    metrics::describe_counter!("analysis_jobs_completed_total", "Analyses that reached completed");
    metrics::describe_counter!("analysis_jobs_failed_total", "Analyses that reached failed");
    metrics::describe_counter!(
        "analysis_dispatch_fallbacks_total",
        "Submissions run in process because the distributed backend was unavailable"
    );
    metrics::describe_counter!(
        "analysis_stage_failures_total",
        "Non-fatal stage failures, by stage"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Wall-clock time of one pipeline run"
    );
    metrics::describe_gauge!("analysis_queue_depth", "Submissions waiting in the redis queue");
}
