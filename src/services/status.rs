//! Uniform status lookup for task handles issued by either execution path.
//!
//! Resolution tries, in order: the job store for an in-process handle, the
//! distributed backend for a queue handle, and finally the raw string as a
//! bare analysis id. The first attempt that finds something answers.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::analysis::{ResolvedVia, TaskStatusResponse};
use crate::models::job::{AnalysisJob, JobStatus};
use crate::models::task::{TaskHandle, TaskHandleError};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::queue::{DistributedBackend, TaskState};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Task {task_id} not found")]
    NotFound { task_id: String, hints: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct StatusResolver {
    store: Arc<dyn JobStore>,
    backend: Option<Arc<dyn DistributedBackend>>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn JobStore>, backend: Option<Arc<dyn DistributedBackend>>) -> Self {
        Self { store, backend }
    }

    pub async fn resolve(&self, task_id: &str) -> Result<TaskStatusResponse, ResolveError> {
        let task_id = task_id.trim();
        let mut hints = Vec::new();

        match task_id.parse::<TaskHandle>() {
            Ok(TaskHandle::InProcess(job_id)) => {
                if let Some(job) = self.store.get(job_id).await? {
                    return Ok(from_job(task_id, &job, ResolvedVia::InProcess));
                }
                hints.push(format!("no analysis job with id {} exists", job_id));
            }
            Ok(TaskHandle::Distributed(backend_id)) => {
                if let Some(status) = self.query_backend(task_id, &backend_id, &mut hints).await? {
                    return Ok(status);
                }
            }
            Err(TaskHandleError::Untagged(_)) => {}
            Err(e) => hints.push(e.to_string()),
        }

        if let Ok(job_id) = Uuid::parse_str(task_id) {
            if let Some(job) = self.store.get(job_id).await? {
                tracing::debug!(task_id, "Resolved bare analysis id");
                return Ok(from_job(task_id, &job, ResolvedVia::BareJobId));
            }
            hints.push(format!("no analysis job with id {} exists", job_id));
        }

        hints.push("use the task_id returned by POST /api/neighborhood/analyze".to_string());
        hints.push("completed analyses remain available at GET /api/neighborhood/{analysis_id}".to_string());

        Err(ResolveError::NotFound {
            task_id: task_id.to_string(),
            hints,
        })
    }

    async fn query_backend(
        &self,
        task_id: &str,
        backend_id: &str,
        hints: &mut Vec<String>,
    ) -> Result<Option<TaskStatusResponse>, StoreError> {
        let Some(backend) = &self.backend else {
            hints.push("task was queued on the distributed backend, which is not configured here".to_string());
            return Ok(None);
        };

        let state = match backend.task_state(backend_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                hints.push("distributed task state is unknown or has expired".to_string());
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Distributed backend lookup failed");
                hints.push(format!("distributed backend lookup failed: {}", e));
                return Ok(None);
            }
        };

        let mut result = state.result();
        if result.is_none() && state.status() == JobStatus::Completed {
            if let Some(job_id) = state.job_id {
                result = self
                    .store
                    .get(job_id)
                    .await?
                    .and_then(|job| job.result_json());
            }
        }

        Ok(Some(from_state(task_id, &state, result)))
    }
}

fn from_job(task_id: &str, job: &AnalysisJob, via: ResolvedVia) -> TaskStatusResponse {
    TaskStatusResponse {
        task_id: task_id.to_string(),
        analysis_id: Some(job.id),
        status: job.status,
        progress: job.progress,
        message: job.message.clone(),
        result: job.result_json(),
        error: match job.status {
            JobStatus::Failed => job.error.clone(),
            _ => None,
        },
        resolved_via: via,
    }
}

fn from_state(task_id: &str, state: &TaskState, result: Option<serde_json::Value>) -> TaskStatusResponse {
    let status = state.status();
    let message = state.message();
    TaskStatusResponse {
        task_id: task_id.to_string(),
        analysis_id: state.job_id,
        status,
        progress: state.progress(),
        error: (status == JobStatus::Failed).then(|| message.clone()),
        message,
        result,
        resolved_via: ResolvedVia::Distributed,
    }
}
