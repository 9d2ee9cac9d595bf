use std::collections::HashMap;

use crate::scheduler::job::{Job, JobId, JobStatus};

/// In-memory job collection.
///
/// Jobs keep their insertion order, which is the dequeue order. Records are
/// never removed.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from a persisted collection. A repeated id keeps its
    /// first occurrence.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut queue = Self::new();
        for job in jobs {
            let id = job.id.clone();
            if !queue.add_job(job) {
                tracing::warn!(job_id = %id, "Duplicate job id in stored collection, keeping first");
            }
        }
        queue
    }

    /// Append a job. Returns false if the id is already present.
    pub fn add_job(&mut self, job: Job) -> bool {
        if self.index.contains_key(&job.id) {
            return false;
        }
        self.index.insert(job.id.clone(), self.jobs.len());
        self.jobs.push(job);
        true
    }

    pub fn get_job(&self, id: &JobId) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    pub fn get_job_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.jobs[i]),
            None => None,
        }
    }

    /// First queued job in insertion order
    pub fn next_queued(&self) -> Option<&Job> {
        self.jobs.iter().find(|j| j.status == JobStatus::Queued)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<&Job> {
        self.jobs.iter().filter(|j| j.status == status).collect()
    }

    /// Most recently updated first, capped at `limit`
    pub fn recent(&self, limit: usize) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.iter().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        jobs
    }

    /// All jobs in insertion order
    pub fn all_jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
