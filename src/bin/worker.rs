use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use neighborhood_insight::{
    config::AppConfig,
    db,
    models::job::{AnalysisJob, JobStatus},
    services::{
        job_store::PgJobStore,
        pipeline::{PipelineExecutor, ProgressReporter},
        queue::{state, BackendError, QueuedAnalysis, RedisTaskBackend, TaskState},
    },
};

const POLL_INTERVAL_MS: u64 = 1000;

/// Mirrors every job checkpoint into the task's redis state entry.
struct TaskStateReporter<'a> {
    backend: &'a RedisTaskBackend,
    task_id: &'a str,
}

#[async_trait]
impl ProgressReporter for TaskStateReporter<'_> {
    async fn report(&self, job: &AnalysisJob) {
        let entry = match job.status {
            JobStatus::Pending => return,
            JobStatus::Processing => TaskState::new(
                state::PROGRESS,
                job.id,
                json!({ "progress": job.progress, "status": job.message }),
            ),
            JobStatus::Completed => TaskState::new(
                state::SUCCESS,
                job.id,
                json!({ "status": job.message, "result": job.result_json() }),
            ),
            JobStatus::Failed => TaskState::new(
                state::FAILURE,
                job.id,
                json!({ "status": job.message, "error": job.error }),
            ),
        };
        if let Err(e) = self.backend.set_state(self.task_id, &entry).await {
            tracing::warn!(task_id = self.task_id, job_id = %job.id, error = %e, "Failed to publish task state");
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting neighborhood analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Jobs are created by the API process, so the worker needs the shared database.
    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL is required for the worker");
    let redis_url = config
        .redis_url
        .as_deref()
        .expect("REDIS_URL is required for the worker");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Connecting to Redis task backend");
    let backend = RedisTaskBackend::connect(redis_url, config.task_result_ttl_secs)
        .await
        .expect("Failed to connect to Redis");

    let http = config.http_client().expect("Failed to build HTTP client");
    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let executor = PipelineExecutor::from_config(&config, store, http);

    tracing::info!("Worker ready, starting job processing loop");

    let shutdown = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing current job");
                shutdown.store(true, Ordering::SeqCst);
            }
        }
    });

    // A running analysis is never interrupted; shutdown is checked between jobs.
    while !shutdown.load(Ordering::SeqCst) {
        match process_next_job(&executor, &backend).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }

    db_pool.close().await;
}

/// Process the next queued analysis.
/// Returns Ok(true) if a job was processed, Ok(false) if none was queued.
async fn process_next_job(
    executor: &PipelineExecutor,
    backend: &RedisTaskBackend,
) -> Result<bool, BackendError> {
    if let Ok(depth) = backend.queue_depth().await {
        metrics::gauge!("analysis_queue_depth").set(depth as f64);
    }

    let Some(queued) = backend.dequeue().await? else {
        return Ok(false);
    };

    tracing::info!(task_id = %queued.task_id, job_id = %queued.job_id, "Processing analysis");

    let started = TaskState::new(state::STARTED, queued.job_id, json!({ "status": "Analysis started" }));
    if let Err(e) = backend.set_state(&queued.task_id, &started).await {
        tracing::warn!(task_id = %queued.task_id, error = %e, "Failed to publish task state");
    }

    run_job(executor, backend, &queued).await;

    backend.complete(&queued).await?;
    Ok(true)
}

async fn run_job(executor: &PipelineExecutor, backend: &RedisTaskBackend, queued: &QueuedAnalysis) {
    let reporter = TaskStateReporter {
        backend,
        task_id: &queued.task_id,
    };

    match executor.execute(queued.job_id, &reporter).await {
        Ok(job) => {
            tracing::info!(task_id = %queued.task_id, job_id = %job.id, status = %job.status, "Analysis finished");
        }
        // The store is unreachable, so the job's real state is unknown; tell pollers it failed.
        Err(e) => {
            tracing::error!(task_id = %queued.task_id, job_id = %queued.job_id, error = %e, "Failed to record analysis outcome");
            let entry = TaskState::new(state::FAILURE, queued.job_id, json!({ "status": e.to_string() }));
            if let Err(e) = backend.set_state(&queued.task_id, &entry).await {
                tracing::warn!(task_id = %queued.task_id, error = %e, "Failed to publish task state");
            }
        }
    }
}
