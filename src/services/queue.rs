use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::job::JobStatus;

const QUEUE_KEY: &str = "neighborhood:analyses";
const PROCESSING_KEY: &str = "neighborhood:processing";
const STATE_KEY_PREFIX: &str = "neighborhood:task:";

/// Progress reported for a `PROGRESS` entry that carries none.
const DEFAULT_RUNNING_PROGRESS: u8 = 50;

/// Submission payload serialized into Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAnalysis {
    pub task_id: String,
    pub job_id: Uuid,
}

/// Native state vocabulary of the task backend.
pub mod state {
    pub const PENDING: &str = "PENDING";
    pub const STARTED: &str = "STARTED";
    pub const PROGRESS: &str = "PROGRESS";
    pub const SUCCESS: &str = "SUCCESS";
    pub const FAILURE: &str = "FAILURE";
    pub const RETRY: &str = "RETRY";
    pub const REVOKED: &str = "REVOKED";
}

/// A task-state entry as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub state: String,
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub meta: Value,
}

impl TaskState {
    pub fn new(state: &str, job_id: Uuid, meta: Value) -> Self {
        Self {
            state: state.to_string(),
            job_id: Some(job_id),
            meta,
        }
    }

    /// Backend state folded onto the job taxonomy. Unknown states read as pending.
    pub fn status(&self) -> JobStatus {
        match self.state.as_str() {
            state::STARTED | state::PROGRESS | state::RETRY => JobStatus::Processing,
            state::SUCCESS => JobStatus::Completed,
            state::FAILURE | state::REVOKED => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }

    pub fn progress(&self) -> u8 {
        if self.status().is_terminal() {
            return 100;
        }
        if self.state == state::PROGRESS {
            return self
                .meta
                .get("progress")
                .and_then(Value::as_u64)
                .map(|p| p.min(99) as u8)
                .unwrap_or(DEFAULT_RUNNING_PROGRESS);
        }
        0
    }

    /// Best human-readable description carried by `meta`.
    pub fn message(&self) -> String {
        for key in ["status", "message", "detail"] {
            if let Some(text) = self.meta.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
        match &self.meta {
            Value::String(text) => text.clone(),
            Value::Null => format!("Task {}", self.state.to_lowercase()),
            other => other.to_string(),
        }
    }

    pub fn result(&self) -> Option<Value> {
        match self.status() {
            JobStatus::Completed => self.meta.get("result").cloned(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Execution substrate outside this process that issues its own task ids.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Queue the job and return the backend's task id.
    async fn enqueue(&self, job_id: Uuid) -> Result<String, BackendError>;

    async fn task_state(&self, task_id: &str) -> Result<Option<TaskState>, BackendError>;

    async fn health_check(&self) -> Result<(), BackendError>;
}

/// Redis list queue plus expiring per-task state entries.
pub struct RedisTaskBackend {
    client: redis::Client,
    state_ttl_secs: u64,
}

impl RedisTaskBackend {
    pub fn new(redis_url: &str, state_ttl_secs: u64) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            state_ttl_secs,
        })
    }

    /// Open a connection and ping it, so an unreachable server is caught at startup.
    pub async fn connect(redis_url: &str, state_ttl_secs: u64) -> Result<Self, BackendError> {
        let backend = Self::new(redis_url, state_ttl_secs)?;
        backend.health_check().await?;
        Ok(backend)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, BackendError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn state_key(task_id: &str) -> String {
        format!("{}{}", STATE_KEY_PREFIX, task_id)
    }

    pub async fn set_state(&self, task_id: &str, entry: &TaskState) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(entry)?;
        conn.set_ex::<_, _, ()>(Self::state_key(task_id), payload, self.state_ttl_secs)
            .await?;
        Ok(())
    }

    /// Move the next submission to the processing list.
    pub async fn dequeue(&self) -> Result<Option<QueuedAnalysis>, BackendError> {
        let mut conn = self.conn().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove a finished submission from the processing list.
    pub async fn complete(&self, queued: &QueuedAnalysis) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(queued)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

#[async_trait]
impl DistributedBackend for RedisTaskBackend {
    async fn enqueue(&self, job_id: Uuid) -> Result<String, BackendError> {
        let queued = QueuedAnalysis {
            task_id: Uuid::new_v4().to_string(),
            job_id,
        };
        let pending = TaskState::new(state::PENDING, job_id, Value::Null);
        self.set_state(&queued.task_id, &pending).await?;

        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&queued)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(queued.task_id)
    }

    async fn task_state(&self, task_id: &str) -> Result<Option<TaskState>, BackendError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(Self::state_key(task_id)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
