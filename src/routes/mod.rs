pub mod analysis;
pub mod error;
pub mod green_space;
pub mod health;
pub mod metrics;
pub mod tasks;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the HTTP router. `/metrics` is mounted only when a recorder is installed.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/neighborhood/analyze", post(analysis::submit_analysis))
        .route("/api/neighborhood/recent", get(analysis::recent_analyses))
        .route("/api/neighborhood/{analysis_id}", get(analysis::get_analysis))
        .route("/api/green-space/analyze", post(green_space::submit_green_space))
        .route("/api/green-space/recent", get(green_space::recent_green_space))
        .route("/api/green-space/{analysis_id}", get(green_space::get_green_space))
        .route("/api/tasks/{task_id}", get(tasks::get_task_status))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route("/metrics", get(metrics::prometheus_metrics).with_state(handle));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
