use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{AnalysisJob, AnalysisKind, JobStatus};

/// Persistent home of analysis jobs.
///
/// `save` replaces all mutable fields of a job at once and refuses to touch a
/// job that has already reached a terminal state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    async fn save(&self, job: &AnalysisJob) -> Result<(), StoreError>;

    /// Completed jobs of `kind`, most recently completed first.
    async fn list_recent_completed(
        &self,
        kind: AnalysisKind,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Analysis job {0} not found")]
    NotFound(Uuid),

    #[error("Analysis job {0} is already {1}")]
    Terminal(Uuid, JobStatus),

    #[error("Analysis job {0} already exists")]
    Duplicate(Uuid),
}

/// PostgreSQL-backed store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        queries::create_job(&self.pool, job).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(queries::get_job(&self.pool, id).await?)
    }

    async fn save(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        if queries::update_job(&self.pool, job).await? > 0 {
            return Ok(());
        }
        match queries::get_job(&self.pool, job.id).await? {
            Some(existing) => Err(StoreError::Terminal(job.id, existing.status)),
            None => Err(StoreError::NotFound(job.id)),
        }
    }

    async fn list_recent_completed(
        &self,
        kind: AnalysisKind,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(queries::list_recent_completed(&self.pool, kind, limit as i64).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, AnalysisJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn save(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let existing = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
        if existing.status.is_terminal() {
            return Err(StoreError::Terminal(job.id, existing.status));
        }
        *existing = job.clone();
        Ok(())
    }

    async fn list_recent_completed(
        &self,
        kind: AnalysisKind,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut completed: Vec<AnalysisJob> = jobs
            .values()
            .filter(|j| j.kind == kind && j.status == JobStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(limit);
        Ok(completed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
