use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::{CreatedBy, Job, JobId, JobStore, JobType};
use crate::worker::{HandlerRegistry, Worker};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Producer-side request for a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub workspace_id: String,
    pub payload: Value,
    pub created_by: Option<CreatedBy>,
}

impl NewJob {
    pub fn new(job_type: JobType, workspace_id: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type,
            workspace_id: workspace_id.into(),
            payload,
            created_by: None,
        }
    }

    pub fn created_by(mut self, created_by: CreatedBy) -> Self {
        self.created_by = Some(created_by);
        self
    }
}

/// Ties the job store to its worker and exposes the enqueue, cancel and
/// query operations.
pub struct JobEngine {
    config: EngineConfig,
    store: Arc<JobStore>,
    worker: Arc<Worker>,
    autostart: bool,
}

impl JobEngine {
    /// Open the configured store and wire up the standard handlers.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let registry = HandlerRegistry::standard(&config);
        Self::with_registry(config, registry).await
    }

    pub async fn with_registry(config: EngineConfig, registry: HandlerRegistry) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => JobStore::open(path).await?,
            None => JobStore::in_memory(),
        };
        let store = Arc::new(store);
        let worker = Arc::new(Worker::new(Arc::clone(&store), registry, config.job_timeout));

        Ok(Self {
            config,
            store,
            worker,
            autostart: true,
        })
    }

    /// Leave jobs queued on enqueue instead of starting the worker. A later
    /// [`JobEngine::start`] (or another process) runs them.
    pub fn without_autostart(mut self) -> Self {
        self.autostart = false;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Persist a queued job and make sure the worker is running. The job is
    /// visible to `get`/`list` before any handler sees it.
    pub async fn enqueue(&self, request: NewJob) -> Result<Job> {
        let job = Job::new(
            request.job_type,
            request.workspace_id,
            request.payload,
            request.created_by,
        );
        self.store.insert(job.clone()).await?;
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            workspace_id = %job.workspace_id,
            "Job enqueued"
        );

        if self.autostart {
            self.worker.start().await;
        }
        Ok(job)
    }

    /// Cancel a queued or running job. Returns false for terminal or unknown
    /// jobs, which are left untouched.
    pub async fn cancel(&self, id: &JobId) -> Result<bool> {
        let canceled = self.store.update(id, |job| job.cancel()).await?;
        if canceled {
            let signaled = self.worker.cancel_running(id);
            tracing::info!(job_id = %id, in_flight = signaled, "Job canceled");
        }
        Ok(canceled)
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.store.get(id).await
    }

    /// Most recently updated first, capped at the configured page size
    pub async fn list(&self) -> Vec<Job> {
        self.store.list(self.config.list_limit).await
    }

    pub async fn list_with_limit(&self, limit: usize) -> Vec<Job> {
        self.store.list(limit.min(self.config.list_limit)).await
    }

    /// Start draining whatever is queued in the store
    pub async fn start(&self) -> bool {
        self.worker.start().await
    }

    pub async fn wait_idle(&self) {
        self.worker.wait_idle().await
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait_for(&self, id: &JobId, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self
                .store
                .get(id)
                .await
                .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
            if job.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Timeout(timeout));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
        tracing::info!("Job engine stopped");
    }
}
