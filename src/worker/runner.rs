use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::scheduler::{Job, JobId, JobStore};
use crate::worker::dispatch::{HandlerRegistry, JobContext};

pub const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted by shutdown";

/// The single consumer of the job queue.
///
/// At most one loop runs per `Worker`. The loop drives one job to a terminal
/// state at a time, in queue order, and exits when nothing is queued;
/// [`Worker::start`] brings it back.
pub struct Worker {
    store: Arc<JobStore>,
    registry: HandlerRegistry,
    job_timeout: Duration,
    active: Mutex<bool>,
    recovered: AtomicBool,
    state_tx: watch::Sender<bool>,
    current: StdMutex<Option<(JobId, CancellationToken)>>,
    shutdown: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(store: Arc<JobStore>, registry: HandlerRegistry, job_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(false);
        Self {
            store,
            registry,
            job_timeout,
            active: Mutex::new(false),
            recovered: AtomicBool::new(false),
            state_tx,
            current: StdMutex::new(None),
            shutdown: CancellationToken::new(),
            handle: StdMutex::new(None),
        }
    }

    /// Start the loop unless it is already running. Returns whether a new
    /// loop was spawned.
    ///
    /// The first start fails jobs a previous worker left `running`; queries
    /// that never start a worker leave them as they are.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let mut active = self.active.lock().await;
        if *active {
            return false;
        }
        if !self.recovered.swap(true, Ordering::SeqCst) {
            match self.store.recover_interrupted().await {
                Ok(ids) if !ids.is_empty() => {
                    tracing::warn!(count = ids.len(), "Failed jobs interrupted by a previous worker");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to recover interrupted jobs"),
            }
        }
        *active = true;
        self.state_tx.send_replace(true);

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run().await });
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        *self.state_tx.borrow()
    }

    /// Resolves once the loop is not running.
    pub async fn wait_idle(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|active| !*active).await;
    }

    /// Trigger the cancellation token of `id` if it is the job in flight.
    pub fn cancel_running(&self, id: &JobId) -> bool {
        let current = match self.current.lock() {
            Ok(current) => current,
            Err(_) => return false,
        };
        match current.as_ref() {
            Some((running, token)) if running == id => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop after the current job. The in-flight job's child process is
    /// terminated; queued jobs stay queued.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }

    async fn run(self: Arc<Self>) {
        tracing::info!("Worker loop started");
        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!("Worker loop stopping for shutdown");
                break;
            }

            let job = match self.store.claim_next().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    // Re-check under the guard so an enqueue that raced with
                    // this scan is either seen here or restarts the loop.
                    let mut active = self.active.lock().await;
                    if self.store.has_queued().await {
                        continue;
                    }
                    *active = false;
                    self.state_tx.send_replace(false);
                    tracing::info!("Worker loop idle");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Job store failure, worker loop halted");
                    break;
                }
            };

            if let Err(e) = self.drive(job).await {
                tracing::error!(error = %e, "Job store failure, worker loop halted");
                break;
            }
        }

        let mut active = self.active.lock().await;
        *active = false;
        self.state_tx.send_replace(false);
    }

    /// Run one claimed job to a terminal state. Only store failures are
    /// returned; handler failures are recorded on the job.
    async fn drive(&self, job: Job) -> Result<()> {
        let id = job.id.clone();
        let token = self.shutdown.child_token();
        self.set_current(Some((id.clone(), token.clone())));

        tracing::info!(job_id = %id, job_type = %job.job_type, "Job started");
        let ctx = JobContext::new(
            id.clone(),
            job.job_type,
            job.payload,
            Arc::clone(&self.store),
            token.clone(),
        );

        let outcome = match self.registry.get(job.job_type) {
            Some(handler) => match tokio::time::timeout(self.job_timeout, handler.run(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(self.job_timeout)),
            },
            None => Err(EngineError::Handler(format!(
                "no handler registered for job type {}",
                job.job_type
            ))),
        };

        token.cancel();
        self.set_current(None);

        match outcome {
            Ok(()) => {
                if self.store.update(&id, |j| j.succeed()).await? {
                    tracing::info!(job_id = %id, "Job succeeded");
                } else {
                    tracing::info!(job_id = %id, "Job canceled while running");
                }
            }
            Err(e) => {
                let reason = match e {
                    EngineError::Canceled if self.shutdown.is_cancelled() => {
                        INTERRUPTED_BY_SHUTDOWN.to_string()
                    }
                    other => other.to_string(),
                };
                if self.store.update(&id, |j| j.fail(reason.as_str())).await? {
                    tracing::warn!(job_id = %id, error = %reason, "Job failed");
                } else {
                    tracing::info!(job_id = %id, "Job canceled while running");
                }
            }
        }
        Ok(())
    }

    fn set_current(&self, value: Option<(JobId, CancellationToken)>) {
        if let Ok(mut current) = self.current.lock() {
            *current = value;
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("registry", &self.registry)
            .field("job_timeout", &self.job_timeout)
            .field("active", &self.is_active())
            .finish()
    }
}
