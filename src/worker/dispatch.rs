use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::{JobId, JobStatus, JobStore, JobType};
use crate::worker::handlers::{ApiCallHandler, BuildHandler, DeployHandler};

/// Executes one job type. Implementations interpret the payload and report
/// progress through the context; returning `Err` fails the job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<()>;
}

/// Handle given to a running handler: payload access, persisted progress
/// and logs, and cancellation checkpoints.
pub struct JobContext {
    job_id: JobId,
    job_type: JobType,
    payload: Value,
    store: Arc<JobStore>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        job_type: JobType,
        payload: Value,
        store: Arc<JobStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            job_type,
            payload,
            store,
            cancel,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `Err(Canceled)` once the job was canceled or the worker is
    /// shutting down. Call before every external invocation.
    pub async fn checkpoint(&self) -> Result<()> {
        let canceled = self.cancel.is_cancelled()
            || matches!(
                self.store.get(&self.job_id).await,
                Some(job) if job.status == JobStatus::Canceled
            );
        if canceled {
            tracing::info!(job_id = %self.job_id, job_type = %self.job_type, "Job stopped at checkpoint");
            return Err(EngineError::Canceled);
        }
        Ok(())
    }

    pub async fn progress(&self, pct: u8, step: &str) -> Result<()> {
        self.store
            .update(&self.job_id, |job| job.advance(pct, step))
            .await?;
        Ok(())
    }

    pub async fn log(&self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        self.store
            .update(&self.job_id, |job| job.append_log(line))
            .await?;
        Ok(())
    }
}

/// Maps a job type to its handler. New job types register here; the worker
/// loop does not change.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the build, deploy and api_call handlers
    pub fn standard(config: &EngineConfig) -> Self {
        Self::new()
            .with(JobType::Build, BuildHandler::new(&config.builder))
            .with(JobType::Deploy, DeployHandler::new(&config.compose))
            .with(JobType::ApiCall, ApiCallHandler)
    }

    pub fn with(mut self, job_type: JobType, handler: impl JobHandler + 'static) -> Self {
        self.register(job_type, Arc::new(handler));
        self
    }

    /// Register or replace the handler for `job_type`
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("job_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Job;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn run(&self, _ctx: &JobContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn standard_registry_covers_all_types() {
        let registry = HandlerRegistry::standard(&EngineConfig::default());
        for job_type in [JobType::Build, JobType::Deploy, JobType::ApiCall] {
            assert!(registry.get(job_type).is_some(), "missing {}", job_type);
        }
        assert_eq!(
            format!("{:?}", registry),
            "HandlerRegistry { job_types: [\"api_call\", \"build\", \"deploy\"] }"
        );
    }

    #[test]
    fn empty_registry_has_no_handlers() {
        let registry = HandlerRegistry::new().with(JobType::ApiCall, Noop);
        assert!(registry.get(JobType::Build).is_none());
        assert!(registry.get(JobType::ApiCall).is_some());
    }

    #[tokio::test]
    async fn context_writes_through_to_store() {
        let store = Arc::new(JobStore::in_memory());
        let job = Job::new(JobType::ApiCall, "ws", json!({}), None);
        let id = job.id.clone();
        store.insert(job).await.unwrap();
        store.claim_next().await.unwrap();

        let ctx = JobContext::new(
            id.clone(),
            JobType::ApiCall,
            json!({}),
            store.clone(),
            CancellationToken::new(),
        );
        ctx.progress(40, "working").await.unwrap();
        ctx.log("hello").await.unwrap();
        ctx.checkpoint().await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.pct, 40);
        assert_eq!(stored.step, "working");
        assert_eq!(stored.logs, vec!["hello"]);
    }

    #[tokio::test]
    async fn checkpoint_observes_store_cancel_and_token() {
        let store = Arc::new(JobStore::in_memory());
        let job = Job::new(JobType::ApiCall, "ws", json!({}), None);
        let id = job.id.clone();
        store.insert(job).await.unwrap();
        store.claim_next().await.unwrap();

        let token = CancellationToken::new();
        let ctx = JobContext::new(id.clone(), JobType::ApiCall, json!({}), store.clone(), token.clone());

        store.update(&id, |j| j.cancel()).await.unwrap();
        assert!(matches!(ctx.checkpoint().await, Err(EngineError::Canceled)));

        let other = Job::new(JobType::ApiCall, "ws", json!({}), None);
        let other_id = other.id.clone();
        store.insert(other).await.unwrap();
        let ctx = JobContext::new(other_id, JobType::ApiCall, json!({}), store, token.clone());
        token.cancel();
        assert!(matches!(ctx.checkpoint().await, Err(EngineError::Canceled)));
    }
}
