use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::error::{EngineError, Result};
use crate::scheduler::job::{Job, JobId, JobStatus};
use crate::scheduler::queue::JobQueue;

pub const INTERRUPTED_ON_RESTART: &str = "interrupted: worker restarted";

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

/// On-disk shape of the job collection: `{"jobs": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Serialize)]
struct JobDocumentRef<'a> {
    jobs: &'a [Job],
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("jobs.json"));
    name.push(suffix);
    path.with_file_name(name)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::store(parent, e))?;
    }
    Ok(())
}

/// Exclusive `<file>.lock` held for one read-modify-write of the document,
/// so processes sharing a store never write over each other's changes.
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    async fn acquire(store_path: &Path) -> Result<Self> {
        let path = sibling(store_path, ".lock");
        ensure_parent(&path).await?;
        let deadline = tokio::time::Instant::now() + LOCK_STALE_AFTER;
        loop {
            let attempt = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match attempt {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if tokio::time::Instant::now() >= deadline {
                        // Held far longer than any single write takes: the holder died.
                        tracing::warn!(path = %path.display(), "Breaking stale job store lock");
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(EngineError::store(&path, e)),
                        }
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(EngineError::store(&path, e)),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release job store lock");
        }
    }
}

/// Whole-document persistence of the job collection.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    path: PathBuf,
}

impl JobSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document without repairing it. A missing document reads as
    /// an empty collection.
    pub async fn read(&self) -> Result<JobDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JobDocument::default()),
            Err(e) => Err(EngineError::store(&self.path, e)),
        }
    }

    /// Read the document. A missing document is created empty; an
    /// unparseable one is moved aside to `<file>.corrupt` and replaced by an
    /// empty one. Any other I/O failure is returned.
    pub async fn load(&self) -> Result<JobDocument> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Job store not found, creating empty store");
                let doc = JobDocument::default();
                self.save(&doc.jobs).await?;
                return Ok(doc);
            }
            Err(e) => return Err(EngineError::store(&self.path, e)),
        };

        match serde_json::from_slice::<JobDocument>(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let backup = sibling(&self.path, ".corrupt");
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Job store is corrupt, starting from an empty collection"
                );
                tokio::fs::write(&backup, &bytes)
                    .await
                    .map_err(|e| EngineError::store(&backup, e))?;
                let doc = JobDocument::default();
                self.save(&doc.jobs).await?;
                Ok(doc)
            }
        }
    }

    /// Write the full collection. The document is written to a temporary
    /// sibling and renamed into place so readers never see a torn file.
    pub async fn save(&self, jobs: &[Job]) -> Result<()> {
        ensure_parent(&self.path).await?;
        let body = serde_json::to_vec_pretty(&JobDocumentRef { jobs })?;
        let tmp = sibling(&self.path, ".tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| EngineError::store(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| EngineError::store(&self.path, e))
    }
}

/// Shared job collection.
///
/// A durable store treats the document as the source of truth: every
/// mutation holds the in-process write lock and the store's lock file,
/// reloads the document, changes one record and writes it back. Jobs
/// written by another process are therefore kept, and reads reload too so
/// they see them.
#[derive(Debug)]
pub struct JobStore {
    queue: RwLock<JobQueue>,
    snapshot: Option<JobSnapshot>,
}

impl JobStore {
    pub fn in_memory() -> Self {
        Self {
            queue: RwLock::new(JobQueue::new()),
            snapshot: None,
        }
    }

    /// Open a durable store, creating or repairing the document. Opening
    /// never changes any job.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = JobSnapshot::new(path);
        let doc = {
            let _lock = StoreLock::acquire(snapshot.path()).await?;
            snapshot.load().await?
        };
        let queue = JobQueue::from_jobs(doc.jobs);

        tracing::info!(
            path = %snapshot.path().display(),
            jobs = queue.len(),
            "Job store opened"
        );

        Ok(Self {
            queue: RwLock::new(queue),
            snapshot: Some(snapshot),
        })
    }

    /// Fail every job left `running` by a worker that is gone. Only the
    /// process about to run the worker may call this.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>> {
        self.mutate(|queue| {
            let interrupted: Vec<JobId> = queue
                .jobs_with_status(JobStatus::Running)
                .into_iter()
                .map(|j| j.id.clone())
                .collect();
            for id in &interrupted {
                if let Some(job) = queue.get_job_mut(id) {
                    job.fail(INTERRUPTED_ON_RESTART);
                    tracing::warn!(job_id = %id, "Job was running when the previous worker stopped, marked failed");
                }
            }
            let changed = !interrupted.is_empty();
            (interrupted, changed)
        })
        .await
    }

    /// Run `f` against the current collection; `f` reports whether it
    /// changed anything, and only changes are written back.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JobQueue) -> (T, bool),
    {
        let mut queue = self.queue.write().await;
        let snapshot = match &self.snapshot {
            Some(snapshot) => snapshot,
            None => return Ok(f(&mut *queue).0),
        };

        let _lock = StoreLock::acquire(snapshot.path()).await?;
        *queue = JobQueue::from_jobs(snapshot.load().await?.jobs);
        let (value, changed) = f(&mut *queue);
        if changed {
            snapshot.save(queue.all_jobs()).await?;
        }
        Ok(value)
    }

    /// Read access to the collection, refreshed from the document. A
    /// document that cannot be read leaves the last known copy in place.
    async fn current(&self) -> RwLockReadGuard<'_, JobQueue> {
        let snapshot = match &self.snapshot {
            Some(snapshot) => snapshot,
            None => return self.queue.read().await,
        };
        let mut queue = self.queue.write().await;
        match snapshot.read().await {
            Ok(doc) => *queue = JobQueue::from_jobs(doc.jobs),
            Err(e) => {
                tracing::warn!(path = %snapshot.path().display(), error = %e, "Job store unreadable, serving cached jobs");
            }
        }
        queue.downgrade()
    }

    pub async fn insert(&self, job: Job) -> Result<()> {
        let id = job.id.clone();
        let added = self
            .mutate(|queue| {
                let added = queue.add_job(job);
                (added, added)
            })
            .await?;
        if !added {
            return Err(EngineError::DuplicateJob(id.to_string()));
        }
        Ok(())
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.current().await.get_job(id).cloned()
    }

    /// Most recently updated first, capped at `limit`
    pub async fn list(&self, limit: usize) -> Vec<Job> {
        self.current()
            .await
            .recent(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn has_queued(&self) -> bool {
        self.current().await.next_queued().is_some()
    }

    /// Apply `f` to one record. Returns true if the job exists and `f`
    /// reported a change; only changes are persisted.
    pub async fn update<F>(&self, id: &JobId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        self.mutate(|queue| match queue.get_job_mut(id) {
            Some(job) => {
                let changed = f(job);
                (changed, changed)
            }
            None => (false, false),
        })
        .await
    }

    /// Atomically move the first queued job to running and return it.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        self.mutate(|queue| {
            let id = match queue.next_queued() {
                Some(job) => job.id.clone(),
                None => return (None, false),
            };
            match queue.get_job_mut(&id) {
                Some(job) => {
                    if !job.start() {
                        return (None, false);
                    }
                    (Some(job.clone()), true)
                }
                None => (None, false),
            }
        })
        .await
    }
}
