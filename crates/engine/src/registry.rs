//! In-memory job registry.
//!
//! The registry is the single source of truth for job state. It stores
//! [`Job`] records behind an async `RwLock` and exposes one method per
//! lifecycle transition; each delegates to the state machine on [`Job`],
//! so illegal transitions come back as [`CoreError::InvalidTransition`].
//!
//! Active jobs are never evicted. Finished jobs (completed, failed or
//! cancelled) are kept for lookup up to a retention limit; past it the job
//! that finished earliest is dropped and reads as unknown.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use kazi_core::error::CoreError;
use kazi_core::job::{InputDescriptor, Job, JobMetadata, JobStatus, OutputDescriptor, Route};
use kazi_core::media::ProcessingOptions;
use kazi_core::types::{new_job_id, JobId};

/// Finished jobs kept by [`JobRegistry::new`].
pub const DEFAULT_JOB_RETENTION: usize = 1000;

#[derive(Debug, Default)]
struct Jobs {
    by_id: HashMap<JobId, Job>,
    /// Terminal job ids, earliest finished first.
    finished: VecDeque<JobId>,
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    retention: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that keeps at most `retention` finished jobs.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            retention,
        }
    }

    /// Register a new job in the `queued` state.
    pub async fn create_job(
        &self,
        input: InputDescriptor,
        options: ProcessingOptions,
        metadata: JobMetadata,
    ) -> JobId {
        let job = Job::new(new_job_id(), input, options, metadata);
        let id = job.id;
        self.jobs.write().await.by_id.insert(id, job);
        tracing::debug!(job_id = %id, "Job registered");
        id
    }

    /// Snapshot of a job.
    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.by_id.get(&id).cloned()
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().await.by_id.get(&id).map(|job| job.status)
    }

    /// Every job, oldest first.
    pub async fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.by_id.values().cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    /// Queued and processing jobs, oldest first.
    pub async fn list_active(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .by_id
            .values()
            .filter(|job| job.status.is_active())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.by_id.len()
    }

    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .by_id
            .values()
            .filter(|job| job.status.is_active())
            .count()
    }

    pub async fn mark_processing(&self, id: JobId, route: Route) -> Result<(), CoreError> {
        self.with_job(id, |job| job.start(route)).await
    }

    pub async fn assign_remote_id(&self, id: JobId, remote_job_id: &str) -> Result<(), CoreError> {
        self.with_job(id, |job| job.assign_remote_id(remote_job_id))
            .await
    }

    /// Record progress. Returns the accepted value, or `None` when the
    /// report did not move the job forward.
    pub async fn update_progress(&self, id: JobId, progress: u8) -> Result<Option<u8>, CoreError> {
        self.with_job(id, |job| job.advance_progress(progress)).await
    }

    pub async fn complete(&self, id: JobId, output: OutputDescriptor) -> Result<(), CoreError> {
        self.with_job(id, |job| job.complete(output)).await
    }

    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<(), CoreError> {
        let error = error.into();
        self.with_job(id, |job| job.fail(error)).await
    }

    pub async fn cancel(&self, id: JobId) -> Result<(), CoreError> {
        self.with_job(id, |job| job.cancel()).await
    }

    async fn with_job<T, F>(&self, id: JobId, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Job) -> Result<T, CoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.by_id.get_mut(&id).ok_or(CoreError::NotFound(id))?;
        let was_terminal = job.status.is_terminal();
        let result = f(job)?;
        if !was_terminal && job.status.is_terminal() {
            jobs.finished.push_back(id);
            self.evict_finished(&mut jobs);
        }
        Ok(result)
    }

    fn evict_finished(&self, jobs: &mut Jobs) {
        while jobs.finished.len() > self.retention {
            if let Some(oldest) = jobs.finished.pop_front() {
                jobs.by_id.remove(&oldest);
                tracing::debug!(job_id = %oldest, "Finished job evicted");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
