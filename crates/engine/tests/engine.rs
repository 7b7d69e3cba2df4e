//! Integration tests for `Engine`.
//!
//! Drive submissions end to end through the real worker pool, with
//! in-test fakes standing in for the processing service and the analyzer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::broadcast;

use kazi_core::analysis::{AnalysisResult, ContentAnalyzer, KeywordAnalyzer};
use kazi_core::error::CoreError;
use kazi_core::job::{JobMetadata, JobStatus, OutputDescriptor, Route, TargetAudience};
use kazi_core::media::{MediaContent, MediaFormat, ProcessingOptions, Quality, Resolution};
use kazi_core::types::{new_job_id, JobId};
use kazi_engine::{Engine, EngineConfig, EngineDeps, EngineError};
use kazi_events::{JobEvent, JobEventKind};
use kazi_remote::api::{HttpProcessingService, ProcessingService, RemoteApiError};
use kazi_remote::messages::{
    ProcessRequest, RemoteOutput, RemoteStatus, StatusResponse, ThumbnailRequest,
};
use kazi_remote::poller::{PollConfig, RetryBackoff};
use kazi_worker::{LocalProcessor, ProcessPayload, ProgressReporter, StagedProcessor, WorkerError};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Holds its worker until the job is cancelled.
struct StallingProcessor;

#[async_trait]
impl LocalProcessor for StallingProcessor {
    async fn process(
        &self,
        _payload: &ProcessPayload,
        progress: &ProgressReporter,
    ) -> Result<OutputDescriptor, WorkerError> {
        progress.report(5);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(WorkerError::Execution("stalled".into()))
    }
}

/// Panics partway through every job.
struct PanickingProcessor;

#[async_trait]
impl LocalProcessor for PanickingProcessor {
    async fn process(
        &self,
        _payload: &ProcessPayload,
        progress: &ProgressReporter,
    ) -> Result<OutputDescriptor, WorkerError> {
        progress.report(19);
        panic!("decoder blew up");
    }
}

type StatusResult = Result<StatusResponse, RemoteApiError>;

/// Scripted processing service.
struct FakeRemote {
    reject_with: Option<u16>,
    script: Mutex<VecDeque<StatusResult>>,
    fallback: fn() -> StatusResult,
    submissions: AtomicUsize,
    branding: Mutex<Option<bool>>,
}

impl FakeRemote {
    fn new(script: Vec<StatusResult>, fallback: fn() -> StatusResult) -> Arc<Self> {
        Arc::new(Self {
            reject_with: None,
            script: Mutex::new(script.into()),
            fallback,
            submissions: AtomicUsize::new(0),
            branding: Mutex::new(None),
        })
    }

    fn rejecting(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reject_with: Some(status),
            script: Mutex::new(VecDeque::new()),
            fallback: || processing(0),
            submissions: AtomicUsize::new(0),
            branding: Mutex::new(None),
        })
    }

    fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessingService for FakeRemote {
    async fn submit(&self, request: ProcessRequest<'_>) -> Result<String, RemoteApiError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(status) = self.reject_with {
            return Err(RemoteApiError::ApiError {
                status,
                body: format!("cannot process {}", request.content.name),
            });
        }
        Ok(format!("remote-{n}"))
    }

    async fn status(&self, _remote_job_id: &str) -> Result<StatusResponse, RemoteApiError> {
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(self.fallback)
    }

    async fn thumbnail(&self, request: ThumbnailRequest<'_>) -> Result<String, RemoteApiError> {
        *self.branding.lock().unwrap() = Some(request.branding);
        Ok(format!(
            "https://cdn.example/thumbs/{}@{}.jpg",
            request.content.name, request.timestamp_secs
        ))
    }
}

fn processing(progress: u8) -> StatusResult {
    Ok(StatusResponse {
        status: RemoteStatus::Processing,
        progress,
        output: None,
        error: None,
    })
}

fn completed(url: &str) -> StatusResult {
    Ok(StatusResponse {
        status: RemoteStatus::Completed,
        progress: 100,
        output: Some(RemoteOutput {
            url: url.to_string(),
            format: None,
            size: Some(4096),
            quality: None,
        }),
        error: None,
    })
}

fn remote_failed(message: &str) -> StatusResult {
    Ok(StatusResponse {
        status: RemoteStatus::Failed,
        progress: 0,
        output: None,
        error: Some(message.to_string()),
    })
}

fn unavailable() -> StatusResult {
    Err(RemoteApiError::ApiError {
        status: 503,
        body: "overloaded".into(),
    })
}

struct CountingAnalyzer {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingAnalyzer {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentAnalyzer for CountingAnalyzer {
    async fn analyze(&self, content: &MediaContent) -> Result<AnalysisResult, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CoreError::Analysis("model offline".into()));
        }
        KeywordAnalyzer.analyze(content).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config() -> EngineConfig {
    EngineConfig {
        worker_pool_size: 1,
        stage_delay: Duration::from_millis(10),
        output_root: "/tmp/kazi-test".into(),
        poll: PollConfig {
            interval: Duration::from_millis(100),
            retry: RetryBackoff {
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(400),
                multiplier: 2.0,
            },
            max_consecutive_failures: 3,
            timeout: Duration::from_secs(60),
        },
        ..EngineConfig::default()
    }
}

/// Config that sends everything to the processing service.
fn remote_only_config() -> EngineConfig {
    EngineConfig {
        local_size_threshold_bytes: 0,
        ..test_config()
    }
}

fn deps(
    processor: Arc<dyn LocalProcessor>,
    remote: Option<Arc<dyn ProcessingService>>,
) -> EngineDeps {
    EngineDeps {
        processor,
        remote,
        analyzer: Arc::new(KeywordAnalyzer),
        events: None,
    }
}

fn staged() -> Arc<dyn LocalProcessor> {
    Arc::new(StagedProcessor::new("/tmp/kazi-test", Duration::from_millis(10)))
}

fn clip(name: &str, bytes: usize) -> MediaContent {
    MediaContent::new(name, vec![0xAB; bytes]).expect("valid content")
}

/// Collect progress values for `job_id` until its terminal event.
async fn until_terminal(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
) -> (Vec<u8>, JobEvent) {
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("terminal event in time")
            .expect("event bus open");
        if event.job_id != job_id {
            continue;
        }
        match event.kind {
            JobEventKind::Progress { progress: p } => progress.push(p),
            _ => return (progress, event),
        }
    }
}

fn assert_non_decreasing(values: &[u8]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {values:?}"
    );
}

// ---------------------------------------------------------------------------
// Test: a 10 MB tourism clip runs locally to completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn local_job_runs_to_completion() {
    let engine = Engine::start(test_config(), deps(staged(), None));
    let mut rx = engine.events().subscribe();

    let content = clip("diani_sunrise.mp4", 10 * 1024 * 1024).with_resolution(Resolution::P1080);
    let options = ProcessingOptions::default().with_resolution(Resolution::P720);
    let metadata = JobMetadata::new("Diani sunrise").with_tags(["tourism"]);

    let job_id = engine
        .submit_job(content, options, metadata)
        .await
        .expect("submission should succeed");

    let job = engine.get_job(job_id).await.expect("job registered");
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.route, Some(Route::Local { worker: 0 }));
    assert!(job.started_at.is_some());

    let (progress, terminal) = until_terminal(&mut rx, job_id).await;
    assert!(!progress.is_empty());
    assert_non_decreasing(&progress);
    assert_matches!(terminal.kind, JobEventKind::Completed { ref output } if !output.location.is_empty());

    let job = engine.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());
    let output = job.output.expect("output recorded");
    assert_eq!(output.location, format!("/tmp/kazi-test/{job_id}.mp4"));
    assert!(job.metadata.cultural_tags.contains(&"tourism".to_string()));
    assert_eq!(job.metadata.target_audience, TargetAudience::Tourists);

    let stats = engine.stats().await;
    assert_eq!(stats.idle_workers, 1);
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.total_jobs, 1);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: panics in a processor or a listener do not wedge local execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processor_panic_fails_job_and_frees_worker() {
    let engine = Engine::start(test_config(), deps(Arc::new(PanickingProcessor), None));
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("turkana.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect("submission should succeed");

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(terminal.kind, JobEventKind::Error { ref error } if error.contains("decoder blew up"));

    let job = engine.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("Worker execution failed"));
    assert_eq!(engine.stats().await.idle_workers, 1);

    // The only worker takes the next job.
    let next = engine
        .submit_job(clip("turkana2.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect("worker was released");
    assert_eq!(
        engine.get_job(next).await.unwrap().route,
        Some(Route::Local { worker: 0 })
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn listener_panic_does_not_stop_the_pump() {
    let engine = Engine::start(test_config(), deps(staged(), None));
    engine.events().listen(|event| {
        if matches!(event.kind, JobEventKind::Progress { .. }) {
            panic!("listener bug");
        }
    });
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("kilifi.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();

    let (progress, terminal) = until_terminal(&mut rx, job_id).await;
    assert!(!progress.is_empty());
    assert_matches!(terminal.kind, JobEventKind::Completed { .. });
    assert_eq!(engine.get_job(job_id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(engine.stats().await.idle_workers, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn finished_jobs_past_retention_are_forgotten() {
    let config = EngineConfig {
        job_retention: 1,
        ..test_config()
    };
    let engine = Engine::start(config, deps(staged(), None));
    let mut rx = engine.events().subscribe();

    let first = engine
        .submit_job(clip("nanyuki.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();
    until_terminal(&mut rx, first).await;
    let second = engine
        .submit_job(clip("naivasha.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();
    until_terminal(&mut rx, second).await;

    assert!(engine.get_job(first).await.is_none());
    assert_eq!(engine.get_job(second).await.unwrap().status, JobStatus::Completed);
    assert_eq!(engine.stats().await.total_jobs, 1);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: busy workers plus an unreachable service fail synchronously
// ---------------------------------------------------------------------------

#[tokio::test]
async fn busy_workers_and_unreachable_remote_is_dispatch_error() {
    let remote = HttpProcessingService::new("http://127.0.0.1:1", Duration::from_secs(2))
        .expect("client should build");
    let engine = Engine::start(
        test_config(),
        deps(Arc::new(StallingProcessor), Some(Arc::new(remote))),
    );

    let first = engine
        .submit_job(clip("nairobi.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect("first job takes the only worker");

    let err = engine
        .submit_job(clip("kisumu.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect_err("no worker and no reachable service");
    assert_matches!(err, EngineError::Dispatch(ref msg) if msg.contains("unreachable"));

    let jobs = engine.list_all_jobs().await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, first);
    assert_eq!(jobs[1].status, JobStatus::Failed);
    assert!(jobs[1].error.as_deref().is_some_and(|e| e.contains("unreachable")));

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: no route at all registers nothing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn no_route_without_remote_registers_nothing() {
    let engine = Engine::start(test_config(), deps(Arc::new(StallingProcessor), None));

    engine
        .submit_job(clip("a.mp4", 16), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect("first job runs locally");

    let err = engine
        .submit_job(clip("b.mp4", 16), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect_err("worker busy, no remote");
    assert_matches!(err, EngineError::Dispatch(_));
    assert_eq!(engine.stats().await.total_jobs, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn oversized_content_without_remote_is_rejected() {
    let config = EngineConfig {
        local_size_threshold_bytes: 100,
        ..test_config()
    };
    let engine = Engine::start(config, deps(staged(), None));

    let err = engine
        .submit_job(clip("big.mkv", 200), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect_err("too large for local, no remote");
    assert_matches!(err, EngineError::Dispatch(ref msg) if msg.contains("threshold"));

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: input validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn invalid_content_is_input_error() {
    let config = EngineConfig {
        max_content_bytes: 1024,
        ..test_config()
    };
    let engine = Engine::start(config, deps(staged(), None));

    let mut empty = clip("empty.mp4", 1);
    empty.data.clear();
    assert_matches!(
        engine
            .submit_job(empty, ProcessingOptions::default(), JobMetadata::default())
            .await,
        Err(EngineError::Input(_))
    );

    assert_matches!(
        engine
            .submit_job(clip("huge.mp4", 2048), ProcessingOptions::default(), JobMetadata::default())
            .await,
        Err(EngineError::Input(_))
    );
    assert_eq!(engine.stats().await.total_jobs, 0);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: routing is deterministic
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn small_content_prefers_idle_workers_in_order() {
    let remote = FakeRemote::new(Vec::new(), || processing(10));
    let config = EngineConfig {
        worker_pool_size: 2,
        ..test_config()
    };
    let engine = Engine::start(
        config,
        deps(
            Arc::new(StallingProcessor),
            Some(remote.clone() as Arc<dyn ProcessingService>),
        ),
    );

    let mut routes = Vec::new();
    for name in ["one.mp4", "two.mp4", "three.mp4"] {
        let id = engine
            .submit_job(clip(name, 32), ProcessingOptions::default(), JobMetadata::default())
            .await
            .expect("submission should succeed");
        routes.push(engine.get_job(id).await.unwrap().route);
    }

    assert_eq!(routes[0], Some(Route::Local { worker: 0 }));
    assert_eq!(routes[1], Some(Route::Local { worker: 1 }));
    assert_eq!(
        routes[2],
        Some(Route::Remote {
            remote_job_id: Some("remote-1".into())
        })
    );
    assert_eq!(remote.submissions(), 1);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: remote jobs are polled to completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn remote_job_polls_to_completion() {
    let remote = FakeRemote::new(
        vec![
            processing(30),
            processing(20),
            processing(70),
            completed("https://cdn.example/out/mara.mp4"),
        ],
        || processing(0),
    );
    let engine = Engine::start(
        remote_only_config(),
        deps(staged(), Some(remote.clone() as Arc<dyn ProcessingService>)),
    );
    let mut rx = engine.events().subscribe();

    let options = ProcessingOptions::default().with_quality(Quality::High);
    let job_id = engine
        .submit_job(clip("mara_migration.mov", 256), options, JobMetadata::new("Mara migration"))
        .await
        .expect("submission should succeed");

    let (progress, terminal) = until_terminal(&mut rx, job_id).await;
    assert_eq!(progress, vec![30, 70]);
    assert_matches!(terminal.kind, JobEventKind::Completed { .. });

    let job = engine.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.route,
        Some(Route::Remote {
            remote_job_id: Some("remote-1".into())
        })
    );
    assert_eq!(
        job.output,
        Some(OutputDescriptor {
            location: "https://cdn.example/out/mara.mp4".into(),
            format: MediaFormat::Mp4,
            size_bytes: 4096,
            quality: Quality::High,
        })
    );
    assert!(job.metadata.cultural_tags.contains(&"wildlife".to_string()));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_failure_is_recorded() {
    let remote = FakeRemote::new(
        vec![processing(40), remote_failed("transcoder crashed")],
        || processing(0),
    );
    let engine = Engine::start(
        remote_only_config(),
        deps(staged(), Some(remote as Arc<dyn ProcessingService>)),
    );
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("lamu.webm", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(terminal.kind, JobEventKind::Error { ref error } if error == "transcoder crashed");

    let job = engine.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("transcoder crashed"));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn poll_exhaustion_times_out() {
    let remote = FakeRemote::new(Vec::new(), unavailable);
    let engine = Engine::start(
        remote_only_config(),
        deps(staged(), Some(remote as Arc<dyn ProcessingService>)),
    );
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("tsavo.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(terminal.kind, JobEventKind::Error { ref error } if error.starts_with("Timed out"));

    let job = engine.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("3 consecutive failed status polls"));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_is_remote_submission_error() {
    let remote = FakeRemote::rejecting(422);
    let engine = Engine::start(
        remote_only_config(),
        deps(staged(), Some(remote as Arc<dyn ProcessingService>)),
    );

    let err = engine
        .submit_job(clip("ugali.avi", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect_err("service rejects the job");
    assert_matches!(err, EngineError::RemoteSubmission(ref msg) if msg.contains("422"));

    let jobs = engine.list_all_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: remote path over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_job_over_http() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process"))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"jobId": "r-7"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/r-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed",
            "progress": 100,
            "output": {"url": "https://cdn.example/r-7.mp4", "size": 2048}
        })))
        .mount(&server)
        .await;

    let config = EngineConfig {
        remote_api_url: Some(server.uri()),
        poll: PollConfig {
            interval: Duration::from_millis(20),
            ..test_config().poll
        },
        ..remote_only_config()
    };
    let engine = Engine::start(config.clone(), EngineDeps::from_config(&config).unwrap());
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("gengetone_live.mp4", 128), ProcessingOptions::default(), JobMetadata::default())
        .await
        .expect("submission should succeed");

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(
        terminal.kind,
        JobEventKind::Completed { ref output } if output.location == "https://cdn.example/r-7.mp4" && output.size_bytes == 2048
    );

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_local_job_frees_the_worker() {
    let engine = Engine::start(test_config(), deps(Arc::new(StallingProcessor), None));
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("samburu.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();
    assert_eq!(engine.stats().await.idle_workers, 0);

    engine.cancel_job(job_id).await.expect("job is in flight");

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(terminal.kind, JobEventKind::Cancelled);
    assert_eq!(engine.get_job(job_id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(engine.stats().await.idle_workers, 1);

    assert_matches!(
        engine.cancel_job(job_id).await,
        Err(EngineError::InvalidTransition {
            from: JobStatus::Cancelled,
            to: JobStatus::Cancelled
        })
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_remote_job_stops_polling() {
    let remote = FakeRemote::new(Vec::new(), || processing(10));
    let engine = Engine::start(
        remote_only_config(),
        deps(staged(), Some(remote as Arc<dyn ProcessingService>)),
    );
    let mut rx = engine.events().subscribe();

    let job_id = engine
        .submit_job(clip("rugby_sevens.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();
    engine.cancel_job(job_id).await.expect("job is in flight");

    let (_, terminal) = until_terminal(&mut rx, job_id).await;
    assert_matches!(terminal.kind, JobEventKind::Cancelled);
    assert_eq!(engine.get_job(job_id).await.unwrap().status, JobStatus::Cancelled);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_unknown_job_is_not_found() {
    let engine = Engine::start(test_config(), deps(staged(), None));
    let id = new_job_id();
    assert_matches!(engine.cancel_job(id).await, Err(EngineError::NotFound(missing)) if missing == id);
    engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_in_flight_jobs() {
    let engine = Engine::start(test_config(), deps(Arc::new(StallingProcessor), None));

    let job_id = engine
        .submit_job(clip("marathon.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
        .await
        .unwrap();

    engine.shutdown().await;

    assert_eq!(engine.get_job(job_id).await.unwrap().status, JobStatus::Cancelled);
    assert_matches!(
        engine
            .submit_job(clip("late.mp4", 64), ProcessingOptions::default(), JobMetadata::default())
            .await,
        Err(EngineError::Dispatch(_))
    );
}

// ---------------------------------------------------------------------------
// Test: content analysis cache
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn repeated_analysis_hits_the_cache() {
    let analyzer = CountingAnalyzer::new(false);
    let engine = Engine::start(
        test_config(),
        EngineDeps {
            analyzer: analyzer.clone(),
            ..deps(staged(), None)
        },
    );

    let content = clip("maasai_mara_safari.mp4", 512);
    let first = engine.analyze_content(&content).await;
    let second = engine.analyze_content(&content).await;

    assert_eq!(analyzer.calls(), 1);
    assert_eq!(first, second);
    assert!(first.cultural_tags.contains(&"wildlife".to_string()));
    assert_eq!(engine.stats().await.cached_analyses, 1);

    engine.analyze_content(&clip("ugali_recipe.mp4", 512)).await;
    assert_eq!(analyzer.calls(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cached_analysis_expires_after_ttl() {
    let analyzer = CountingAnalyzer::new(false);
    let config = EngineConfig {
        analysis_cache_ttl: Duration::from_secs(60),
        ..test_config()
    };
    let engine = Engine::start(
        config,
        EngineDeps {
            analyzer: analyzer.clone(),
            ..deps(staged(), None)
        },
    );

    let content = clip("benga_night.mp4", 128);
    engine.analyze_content(&content).await;
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(engine.purge_expired_analyses().await, 1);
    engine.analyze_content(&content).await;

    assert_eq!(analyzer.calls(), 2);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn analyzer_failure_yields_uncached_neutral_result() {
    let analyzer = CountingAnalyzer::new(true);
    let engine = Engine::start(
        test_config(),
        EngineDeps {
            analyzer: analyzer.clone(),
            ..deps(staged(), None)
        },
    );

    let content = clip("nakuru.mp4", 128);
    assert!(engine.analyze_content(&content).await.is_neutral());
    assert!(engine.analyze_content(&content).await.is_neutral());

    assert_eq!(analyzer.calls(), 2);
    assert_eq!(engine.stats().await.cached_analyses, 0);
    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: thumbnails
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn thumbnail_is_generated_remotely_with_branding() {
    let remote = FakeRemote::new(Vec::new(), || processing(0));
    let engine = Engine::start(
        test_config(),
        deps(staged(), Some(remote.clone() as Arc<dyn ProcessingService>)),
    );

    let content = clip("amboseli.mp4", 64).with_duration(30.0);
    let url = engine
        .generate_thumbnail(&content, 12.5)
        .await
        .expect("thumbnail should succeed");

    assert_eq!(url, "https://cdn.example/thumbs/amboseli.mp4@12.5.jpg");
    assert_eq!(*remote.branding.lock().unwrap(), Some(true));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn thumbnail_timestamp_is_validated() {
    let remote = FakeRemote::new(Vec::new(), || processing(0));
    let engine = Engine::start(
        test_config(),
        deps(staged(), Some(remote as Arc<dyn ProcessingService>)),
    );

    let content = clip("short.mp4", 64).with_duration(10.0);
    assert_matches!(
        engine.generate_thumbnail(&content, 10.5).await,
        Err(EngineError::Input(ref msg)) if msg.contains("past the end")
    );
    assert_matches!(
        engine.generate_thumbnail(&content, -1.0).await,
        Err(EngineError::Input(_))
    );
    assert_matches!(
        engine.generate_thumbnail(&content, f64::NAN).await,
        Err(EngineError::Input(_))
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn thumbnail_requires_remote_service() {
    let engine = Engine::start(test_config(), deps(staged(), None));
    let content = clip("local_only.mp4", 64);
    assert_matches!(
        engine.generate_thumbnail(&content, 0.0).await,
        Err(EngineError::Dispatch(_))
    );
    engine.shutdown().await;
}
