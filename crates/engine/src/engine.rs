//! Job dispatcher.
//!
//! [`Engine`] accepts submissions, routes each job to the local worker pool
//! or the remote processing service, and drives the job to a terminal state.
//!
//! Two kinds of background task own job state after dispatch:
//!
//! - the worker pump consumes every [`WorkerMessage`] and is the only
//!   writer for locally routed jobs;
//! - one poll task per remote job drives a [`PollTracker`] and is the only
//!   writer for that job.
//!
//! Every accepted state change is mirrored onto the [`EventBus`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use kazi_core::analysis::{enrich_metadata, AnalysisResult, ContentAnalyzer, KeywordAnalyzer};
use kazi_core::cache::TtlCache;
use kazi_core::hashing::content_fingerprint;
use kazi_core::job::{InputDescriptor, Job, JobMetadata, JobStatus, OutputDescriptor, Route};
use kazi_core::media::{MediaContent, ProcessingOptions};
use kazi_core::types::JobId;
use kazi_events::{EventBus, JobEvent};
use kazi_remote::api::{HttpProcessingService, ProcessingService};
use kazi_remote::messages::{ProcessRequest, ThumbnailRequest};
use kazi_remote::poller::{PollDecision, PollTracker};
use kazi_worker::{
    LocalProcessor, ProcessCommand, ProcessPayload, StagedProcessor, WorkerMessage,
    WorkerMessageKind, WorkerPool,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::JobRegistry;

/// How long [`Engine::shutdown`] waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub processor: Arc<dyn LocalProcessor>,
    /// `None` disables remote routing and thumbnails.
    pub remote: Option<Arc<dyn ProcessingService>>,
    pub analyzer: Arc<dyn ContentAnalyzer>,
    /// Share an existing bus; a fresh one is created when `None`.
    pub events: Option<Arc<EventBus>>,
}

impl EngineDeps {
    /// Default collaborators: [`StagedProcessor`], [`KeywordAnalyzer`] and,
    /// when `remote_api_url` is set, an [`HttpProcessingService`].
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let remote = match &config.remote_api_url {
            Some(url) => {
                let service = HttpProcessingService::new(url.as_str(), config.submit_timeout)
                    .map_err(|e| EngineError::Internal(format!("HTTP client: {e}")))?;
                Some(Arc::new(service) as Arc<dyn ProcessingService>)
            }
            None => None,
        };

        Ok(Self {
            processor: Arc::new(StagedProcessor::new(
                config.output_root.as_str(),
                config.stage_delay,
            )),
            remote,
            analyzer: Arc::new(KeywordAnalyzer),
            events: None,
        })
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub workers: usize,
    pub idle_workers: usize,
    pub active_jobs: usize,
    pub total_jobs: usize,
    pub cached_analyses: usize,
    pub remote_enabled: bool,
}

/// The media job engine.
///
/// Created once via [`Engine::start`]; the returned `Arc` is cheap to
/// clone into callers. Call [`Engine::shutdown`] before dropping it.
pub struct Engine {
    config: EngineConfig,
    registry: JobRegistry,
    events: Arc<EventBus>,
    pool: WorkerPool,
    remote: Option<Arc<dyn ProcessingService>>,
    analyzer: Arc<dyn ContentAnalyzer>,
    analysis_cache: Mutex<TtlCache<String, AnalysisResult>>,
    /// Cancellation handle of every job not yet terminal.
    in_flight: RwLock<HashMap<JobId, CancellationToken>>,
    /// Worker pump and poll tasks.
    tasks: TaskTracker,
    /// Master cancellation token; per-job tokens are its children.
    cancel: CancellationToken,
}

impl Engine {
    /// Spawn the worker pool and the worker pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: EngineConfig, deps: EngineDeps) -> Arc<Self> {
        let (pool, messages) = WorkerPool::spawn(
            config.worker_pool_size,
            deps.processor,
            config.local_job_timeout,
        );
        let events = deps
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(config.event_capacity)));
        let analysis_cache = Mutex::new(TtlCache::new(config.analysis_cache_max_entries));

        let registry = JobRegistry::with_retention(config.job_retention);

        let engine = Arc::new(Self {
            config,
            registry,
            events,
            pool,
            remote: deps.remote,
            analyzer: deps.analyzer,
            analysis_cache,
            in_flight: RwLock::new(HashMap::new()),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        });

        engine
            .tasks
            .spawn(Arc::clone(&engine).run_worker_pump(messages));

        tracing::info!(
            workers = engine.pool.size(),
            local_threshold_bytes = engine.config.local_size_threshold_bytes,
            remote_api_url = engine.config.remote_api_url.as_deref().unwrap_or("-"),
            "Engine started",
        );
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The bus every job event is published on.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ---- submission ----

    /// Accept a job and dispatch it.
    ///
    /// Returns as soon as the job is `processing`; progress and the outcome
    /// arrive on the event bus and through [`get_job`](Self::get_job).
    ///
    /// Content strictly below the local size threshold goes to the first
    /// idle worker. Everything else goes to the processing service. When
    /// neither path is available the call fails with
    /// [`EngineError::Dispatch`] and nothing is registered.
    pub async fn submit_job(
        self: &Arc<Self>,
        content: MediaContent,
        options: ProcessingOptions,
        mut metadata: JobMetadata,
    ) -> Result<JobId, EngineError> {
        self.validate(&content)?;
        if self.cancel.is_cancelled() {
            return Err(EngineError::Dispatch("engine is shutting down".into()));
        }

        let size = content.size_bytes();
        let fits_locally = size < self.config.local_size_threshold_bytes;
        let worker = if fits_locally {
            self.pool.try_acquire()
        } else {
            None
        };

        if worker.is_none() && self.remote.is_none() {
            let reason = if fits_locally {
                "all local workers are busy and no processing service is configured"
            } else {
                "content exceeds the local size threshold and no processing service is configured"
            };
            tracing::warn!(name = %content.name, size, reason, "Job rejected");
            return Err(EngineError::Dispatch(reason.into()));
        }

        enrich_metadata(&mut metadata);
        let job_id = self
            .registry
            .create_job(InputDescriptor::from(&content), options.clone(), metadata.clone())
            .await;
        let cancel = self.cancel.child_token();
        self.in_flight.write().await.insert(job_id, cancel.clone());

        tracing::info!(
            %job_id,
            name = %content.name,
            size,
            cultural_tags = ?metadata.cultural_tags,
            route = if worker.is_some() { "local" } else { "remote" },
            "Job accepted",
        );

        match worker {
            Some(worker) => {
                self.dispatch_local(job_id, worker, content, options, cancel)
                    .await?
            }
            None => {
                self.dispatch_remote(job_id, content, options, metadata, cancel)
                    .await?
            }
        }
        Ok(job_id)
    }

    fn validate(&self, content: &MediaContent) -> Result<(), EngineError> {
        if content.data.is_empty() {
            return Err(EngineError::Input(format!("\"{}\" is empty", content.name)));
        }
        if content.size_bytes() > self.config.max_content_bytes {
            return Err(EngineError::Input(format!(
                "\"{}\" is {} bytes, above the {} byte limit",
                content.name,
                content.size_bytes(),
                self.config.max_content_bytes
            )));
        }
        Ok(())
    }

    async fn dispatch_local(
        &self,
        job_id: JobId,
        worker: usize,
        content: MediaContent,
        options: ProcessingOptions,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        if let Err(e) = self
            .registry
            .mark_processing(job_id, Route::Local { worker })
            .await
        {
            self.pool.release(worker);
            self.forget(job_id).await;
            return Err(e.into());
        }

        let command = ProcessCommand {
            job_id,
            payload: ProcessPayload {
                content: Arc::new(content),
                options,
            },
            cancel,
        };
        if let Err(e) = self.pool.dispatch(worker, command) {
            let err = EngineError::from(e);
            self.finish_failed(job_id, err.to_string()).await;
            return Err(err);
        }

        tracing::info!(%job_id, worker, "Job dispatched to local worker");
        Ok(())
    }

    async fn dispatch_remote(
        self: &Arc<Self>,
        job_id: JobId,
        content: MediaContent,
        options: ProcessingOptions,
        metadata: JobMetadata,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let Some(remote) = self.remote.clone() else {
            self.forget(job_id).await;
            return Err(EngineError::Dispatch(
                "no processing service is configured".into(),
            ));
        };

        self.registry
            .mark_processing(job_id, Route::Remote { remote_job_id: None })
            .await?;

        let request = ProcessRequest {
            content: &content,
            options: &options,
            metadata: &metadata,
        };
        let submitted = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(%job_id, "Job cancelled during remote submission");
                self.finish_cancelled(job_id).await;
                return Ok(());
            }
            result = tokio::time::timeout(self.config.submit_timeout, remote.submit(request)) => result,
        };

        let remote_job_id = match submitted {
            Ok(Ok(remote_job_id)) => remote_job_id,
            Ok(Err(e)) => {
                let err = EngineError::from_submission(e);
                self.finish_failed(job_id, err.to_string()).await;
                return Err(err);
            }
            Err(_) => {
                let err = EngineError::Dispatch(format!(
                    "processing service did not answer within {}s",
                    self.config.submit_timeout.as_secs()
                ));
                self.finish_failed(job_id, err.to_string()).await;
                return Err(err);
            }
        };

        self.registry
            .assign_remote_id(job_id, &remote_job_id)
            .await?;
        tracing::info!(%job_id, %remote_job_id, "Job submitted to processing service");

        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            engine
                .poll_remote_job(job_id, remote_job_id, remote, options, cancel)
                .await;
        });
        Ok(())
    }

    // ---- queries ----

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.registry.get_job(id).await
    }

    pub async fn list_all_jobs(&self) -> Vec<Job> {
        self.registry.list_all().await
    }

    pub async fn list_active_jobs(&self) -> Vec<Job> {
        self.registry.list_active().await
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            workers: self.pool.size(),
            idle_workers: self.pool.idle_count(),
            active_jobs: self.registry.active_count().await,
            total_jobs: self.registry.len().await,
            cached_analyses: self.analysis_cache.lock().await.len(),
            remote_enabled: self.remote.is_some(),
        }
    }

    // ---- analysis & thumbnails ----

    /// Analyze `content`, serving repeat requests from the TTL cache.
    ///
    /// Never fails: an analyzer error is logged and the neutral result is
    /// returned (and not cached).
    pub async fn analyze_content(&self, content: &MediaContent) -> AnalysisResult {
        let key = content_fingerprint(content);
        if let Some(hit) = self.analysis_cache.lock().await.get(&key) {
            tracing::debug!(name = %content.name, "Analysis cache hit");
            return hit;
        }

        match self.analyzer.analyze(content).await {
            Ok(result) => {
                self.analysis_cache.lock().await.set(
                    key,
                    result.clone(),
                    self.config.analysis_cache_ttl,
                );
                result
            }
            Err(e) => {
                tracing::warn!(
                    name = %content.name,
                    error = %EngineError::from(e),
                    "Falling back to neutral analysis",
                );
                AnalysisResult::neutral()
            }
        }
    }

    /// Drop expired analyses. Returns how many were removed.
    pub async fn purge_expired_analyses(&self) -> usize {
        self.analysis_cache.lock().await.purge_expired()
    }

    /// Render a thumbnail at `timestamp_secs` through the processing
    /// service and return its URL.
    pub async fn generate_thumbnail(
        &self,
        content: &MediaContent,
        timestamp_secs: f64,
    ) -> Result<String, EngineError> {
        self.validate(content)?;
        if !timestamp_secs.is_finite() || timestamp_secs < 0.0 {
            return Err(EngineError::Input(format!(
                "thumbnail timestamp {timestamp_secs} is not a non-negative number of seconds"
            )));
        }
        if let Some(duration) = content.duration_secs {
            if timestamp_secs > duration {
                return Err(EngineError::Input(format!(
                    "thumbnail timestamp {timestamp_secs}s is past the end of \"{}\" ({duration}s)",
                    content.name
                )));
            }
        }

        let remote = self.remote.as_ref().ok_or_else(|| {
            EngineError::Dispatch("thumbnail generation requires a processing service".into())
        })?;

        let url = remote
            .thumbnail(ThumbnailRequest {
                content,
                timestamp_secs,
                branding: self.config.thumbnail_branding,
            })
            .await
            .map_err(EngineError::from_submission)?;

        tracing::info!(name = %content.name, timestamp_secs, %url, "Thumbnail generated");
        Ok(url)
    }

    // ---- cancellation & shutdown ----

    /// Request cancellation of an in-flight job.
    ///
    /// The job becomes `cancelled` once its owning path acknowledges; watch
    /// the event bus for the `cancelled` event.
    pub async fn cancel_job(&self, id: JobId) -> Result<(), EngineError> {
        let status = self
            .registry
            .status(id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        let not_cancellable = EngineError::InvalidTransition {
            from: status,
            to: JobStatus::Cancelled,
        };
        if !status.can_transition_to(JobStatus::Cancelled) {
            return Err(not_cancellable);
        }

        match self.in_flight.read().await.get(&id) {
            Some(token) => {
                token.cancel();
                tracing::info!(job_id = %id, "Job cancellation requested");
                Ok(())
            }
            None => Err(not_cancellable),
        }
    }

    /// Cancel every in-flight job, stop the worker contexts and wait for
    /// background tasks to drain.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down engine");
        self.cancel.cancel();
        self.pool.shutdown().await;

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Engine tasks did not exit in time"
            );
        }
        tracing::info!("Engine shut down complete");
    }

    // ---- background tasks ----

    /// Apply worker reports to the registry until every context is gone.
    async fn run_worker_pump(self: Arc<Self>, mut messages: mpsc::UnboundedReceiver<WorkerMessage>) {
        while let Some(WorkerMessage {
            worker,
            job_id,
            kind,
        }) = messages.recv().await
        {
            match kind {
                WorkerMessageKind::Progress(progress) => {
                    self.record_progress(job_id, progress).await;
                }
                WorkerMessageKind::Completed(output) => {
                    self.pool.release(worker);
                    self.finish_completed(job_id, output).await;
                }
                WorkerMessageKind::Error(error) => {
                    self.pool.release(worker);
                    self.finish_failed(job_id, EngineError::WorkerExecution(error).to_string())
                        .await;
                }
                WorkerMessageKind::Cancelled => {
                    self.pool.release(worker);
                    self.finish_cancelled(job_id).await;
                }
            }
        }
        tracing::debug!("Worker message channel closed");
    }

    /// Poll the processing service until the job reaches a terminal state,
    /// the retry budget runs out, or the job is cancelled.
    async fn poll_remote_job(
        self: Arc<Self>,
        job_id: JobId,
        remote_job_id: String,
        remote: Arc<dyn ProcessingService>,
        options: ProcessingOptions,
        cancel: CancellationToken,
    ) {
        let mut tracker = PollTracker::new(self.config.poll.clone());
        let mut delay = tracker.first_delay();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = remote.status(&remote_job_id) => result,
            };

            match tracker.observe(result) {
                PollDecision::Continue {
                    progress,
                    next_poll,
                } => {
                    self.record_progress(job_id, progress).await;
                    delay = next_poll;
                }
                PollDecision::Retry {
                    error,
                    attempt,
                    next_poll,
                } => {
                    tracing::warn!(
                        %job_id,
                        %remote_job_id,
                        attempt,
                        retry_in_ms = next_poll.as_millis() as u64,
                        error = %EngineError::RemotePoll(error),
                        "Status poll failed, retrying",
                    );
                    delay = next_poll;
                }
                PollDecision::Completed(output) => {
                    self.finish_completed(job_id, output.into_descriptor(&options))
                        .await;
                    return;
                }
                PollDecision::Failed(error) => {
                    self.finish_failed(job_id, error).await;
                    return;
                }
                PollDecision::Exhausted(reason) => {
                    self.finish_failed(job_id, EngineError::Timeout(reason).to_string())
                        .await;
                    return;
                }
            }
        }

        tracing::info!(%job_id, %remote_job_id, "Remote job cancelled");
        self.finish_cancelled(job_id).await;
    }

    // ---- state changes ----

    async fn record_progress(&self, job_id: JobId, progress: u8) {
        match self.registry.update_progress(job_id, progress).await {
            Ok(Some(accepted)) => {
                tracing::debug!(%job_id, progress = accepted, "Job progress");
                self.events.publish(JobEvent::progress(job_id, accepted));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(%job_id, error = %e, "Dropped progress report");
            }
        }
    }

    async fn finish_completed(&self, job_id: JobId, output: OutputDescriptor) {
        match self.registry.complete(job_id, output.clone()).await {
            Ok(()) => {
                tracing::info!(
                    %job_id,
                    location = %output.location,
                    size_bytes = output.size_bytes,
                    "Job completed",
                );
                self.events.publish(JobEvent::completed(job_id, output));
            }
            Err(e) => tracing::warn!(%job_id, error = %e, "Could not record completion"),
        }
        self.forget(job_id).await;
    }

    async fn finish_failed(&self, job_id: JobId, error: String) {
        match self.registry.fail(job_id, error.clone()).await {
            Ok(()) => {
                tracing::error!(%job_id, %error, "Job failed");
                self.events.publish(JobEvent::error(job_id, error));
            }
            Err(e) => tracing::warn!(%job_id, error = %e, "Could not record failure"),
        }
        self.forget(job_id).await;
    }

    async fn finish_cancelled(&self, job_id: JobId) {
        match self.registry.cancel(job_id).await {
            Ok(()) => {
                tracing::info!(%job_id, "Job cancelled");
                self.events.publish(JobEvent::cancelled(job_id));
            }
            Err(e) => tracing::warn!(%job_id, error = %e, "Could not record cancellation"),
        }
        self.forget(job_id).await;
    }

    async fn forget(&self, job_id: JobId) {
        self.in_flight.write().await.remove(&job_id);
    }
}
