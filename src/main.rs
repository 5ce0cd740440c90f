use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use neighborhood_insight::{
    app_state::AppState,
    config::{AppConfig, TaskBackendKind},
    db,
    routes,
    services::{
        dispatcher::{Dispatcher, InProcessBackend, TaskBackend},
        job_store::{InMemoryJobStore, JobStore, PgJobStore},
        pipeline::PipelineExecutor,
        queue::RedisTaskBackend,
    },
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

    tracing::info!("Initializing neighborhood-insight server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let (store, pool) = init_store(&config).await;

    let http = config.http_client().expect("Failed to build HTTP client");
    let executor = Arc::new(PipelineExecutor::from_config(&config, Arc::clone(&store), http));

    let backend = init_backend(&config).await;
    tracing::info!(task_backend = backend.name(), "Task backend selected");

    let dispatcher = Dispatcher::new(Arc::clone(&store), backend, InProcessBackend::new(executor));
    let state = AppState::new(store, dispatcher);

    let app = routes::router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("Server stopped");
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise a process-local store.
async fn init_store(config: &AppConfig) -> (Arc<dyn JobStore>, Option<PgPool>) {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, analyses are kept in memory only");
        return (Arc::new(InMemoryJobStore::new()), None);
    };

    tracing::info!("Connecting to PostgreSQL database");
    let pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    (Arc::new(PgJobStore::new(pool.clone())), Some(pool))
}

async fn init_backend(config: &AppConfig) -> TaskBackend {
    if config.task_backend != TaskBackendKind::Redis {
        return TaskBackend::InProcess;
    }
    let Some(redis_url) = &config.redis_url else {
        tracing::warn!("TASK_BACKEND=redis but REDIS_URL is not set, running analyses in process");
        return TaskBackend::InProcess;
    };

    tracing::info!("Connecting to Redis task backend");
    match RedisTaskBackend::connect(redis_url, config.task_result_ttl_secs).await {
        Ok(backend) => TaskBackend::Distributed(Arc::new(backend)),
        Err(e) => {
            metrics::counter!("analysis_dispatch_fallbacks_total").increment(1);
            tracing::warn!(error = %e, "Redis unavailable, running analyses in process");
            TaskBackend::InProcess
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
