use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::analysis::{AnalysisRequest, GreenSpaceRequest, SubmitResponse};
use crate::models::job::AnalysisJob;
use crate::models::task::TaskHandle;
use crate::services::job_store::{JobStore, StoreError};
use crate::services::pipeline::{NoopReporter, PipelineExecutor};
use crate::services::queue::DistributedBackend;

/// Where new submissions are sent, chosen once at startup.
#[derive(Clone)]
pub enum TaskBackend {
    Distributed(Arc<dyn DistributedBackend>),
    InProcess,
}

impl TaskBackend {
    pub fn distributed(&self) -> Option<&Arc<dyn DistributedBackend>> {
        match self {
            TaskBackend::Distributed(backend) => Some(backend),
            TaskBackend::InProcess => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskBackend::Distributed(_) => "distributed",
            TaskBackend::InProcess => "in_process",
        }
    }
}

/// Runs the pipeline as a detached task in this process.
#[derive(Clone)]
pub struct InProcessBackend {
    executor: Arc<PipelineExecutor>,
}

impl InProcessBackend {
    pub fn new(executor: Arc<PipelineExecutor>) -> Self {
        Self { executor }
    }

    pub fn spawn(&self, job_id: Uuid) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            if let Err(e) = executor.execute(job_id, &NoopReporter).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record aborted analysis");
            }
        })
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    backend: TaskBackend,
    in_process: InProcessBackend,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, backend: TaskBackend, in_process: InProcessBackend) -> Self {
        Self {
            store,
            backend,
            in_process,
        }
    }

    pub fn backend(&self) -> &TaskBackend {
        &self.backend
    }

    /// Create the job record and schedule it.
    ///
    /// Only a failure to create the job is an error; an unavailable
    /// distributed backend falls back to running the job in this process.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<SubmitResponse, StoreError> {
        let job = AnalysisJob::new(
            request.address.trim(),
            request.radius_m,
            request.amenity_types,
            request.include_buildings,
            request.generate_map,
        );
        self.schedule(job, "Neighborhood analysis queued").await
    }

    /// Same as [`Dispatcher::submit`] for a green-space-only analysis.
    pub async fn submit_green_space(&self, request: GreenSpaceRequest) -> Result<SubmitResponse, StoreError> {
        let job = AnalysisJob::green_space(request.address.trim(), request.radius_m);
        self.schedule(job, "Green space analysis queued").await
    }

    async fn schedule(&self, job: AnalysisJob, message: &str) -> Result<SubmitResponse, StoreError> {
        self.store.create(&job).await?;
        metrics::counter!("analysis_jobs_submitted_total", "kind" => job.kind.to_string()).increment(1);

        let handle = self.dispatch(job.id).await;
        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            task_id = %handle,
            address = %job.address,
            "Analysis submitted"
        );

        Ok(SubmitResponse {
            analysis_id: job.id,
            task_id: handle.to_string(),
            address: job.address,
            status: "queued".to_string(),
            message: message.to_string(),
        })
    }

    async fn dispatch(&self, job_id: Uuid) -> TaskHandle {
        if let TaskBackend::Distributed(backend) = &self.backend {
            match backend.enqueue(job_id).await {
                Ok(task_id) => return TaskHandle::Distributed(task_id),
                Err(e) => {
                    metrics::counter!("analysis_dispatch_fallbacks_total").increment(1);
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Distributed backend unavailable, running analysis in process"
                    );
                }
            }
        }

        self.in_process.spawn(job_id);
        TaskHandle::InProcess(job_id)
    }
}
