//! Local media processing.
//!
//! The transcoding itself is out of scope for the engine; workers call a
//! [`LocalProcessor`]. [`StagedProcessor`] is the default: it walks the
//! stages implied by the job's optimization flags, reports progress after
//! each one, and describes the output it would have written.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kazi_core::job::OutputDescriptor;
use kazi_core::media::ProcessingOptions;
use kazi_core::types::JobId;

use crate::protocol::{ProcessPayload, WorkerMessage, WorkerMessageKind};

/// Progress reported by the final processing stage; completion sets 100.
const LAST_STAGE_PROGRESS: u8 = 95;

/// Errors raised inside a worker context.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The processor reported a failure.
    #[error("Local processing failed: {0}")]
    Execution(String),

    /// The job ran past the per-job time limit.
    #[error("Local processing exceeded {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The job's cancellation token fired.
    #[error("Local processing was cancelled")]
    Cancelled,

    /// The context's inbox is closed or already holds a job.
    #[error("Worker {0} is not accepting jobs")]
    Unavailable(usize),
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Handle a processor uses to send progress back to the engine.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    worker: usize,
    job_id: JobId,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
}

impl ProgressReporter {
    pub fn new(worker: usize, job_id: JobId, outbox: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self {
            worker,
            job_id,
            outbox,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn report(&self, progress: u8) {
        // A closed outbox means the engine is gone; nothing to tell.
        let _ = self.outbox.send(WorkerMessage {
            worker: self.worker,
            job_id: self.job_id,
            kind: WorkerMessageKind::Progress(progress),
        });
    }
}

// ---------------------------------------------------------------------------
// LocalProcessor
// ---------------------------------------------------------------------------

/// Performs the media work for one job inside a worker context.
#[async_trait]
pub trait LocalProcessor: Send + Sync {
    async fn process(
        &self,
        payload: &ProcessPayload,
        progress: &ProgressReporter,
    ) -> Result<OutputDescriptor, WorkerError>;
}

/// Default processor that simulates a staged pipeline.
#[derive(Debug, Clone)]
pub struct StagedProcessor {
    output_root: String,
    stage_delay: Duration,
}

impl StagedProcessor {
    pub fn new(output_root: impl Into<String>, stage_delay: Duration) -> Self {
        Self {
            output_root: output_root.into().trim_end_matches('/').to_string(),
            stage_delay,
        }
    }

    /// Stage names for a job, in execution order.
    pub fn stages(options: &ProcessingOptions) -> Vec<&'static str> {
        let mut stages = vec!["probe"];
        if !options.optimizations.subtitle_languages.is_empty() {
            stages.push("subtitles");
        }
        if options.optimizations.low_bandwidth_audio {
            stages.push("audio");
        }
        stages.push("encode");
        stages.push("package");
        stages
    }

    /// Estimated output size after quality and downscaling.
    fn estimate_size(payload: &ProcessPayload) -> u64 {
        let input = payload.content.size_bytes() as f64;
        let mut ratio = payload.options.quality.size_ratio();
        if let (Some(source), Some(target)) = (
            payload.content.resolution,
            payload.options.effective_resolution(),
        ) {
            if target < source {
                let scale = f64::from(target.height()) / f64::from(source.height());
                ratio *= scale * scale;
            }
        }
        (input * ratio).round() as u64
    }
}

#[async_trait]
impl LocalProcessor for StagedProcessor {
    async fn process(
        &self,
        payload: &ProcessPayload,
        progress: &ProgressReporter,
    ) -> Result<OutputDescriptor, WorkerError> {
        if payload.content.data.is_empty() {
            return Err(WorkerError::Execution(format!(
                "\"{}\" has no data",
                payload.content.name
            )));
        }

        let stages = Self::stages(&payload.options);
        let total = stages.len();
        for (i, stage) in stages.iter().enumerate() {
            tokio::time::sleep(self.stage_delay).await;
            let pct = ((i + 1) * usize::from(LAST_STAGE_PROGRESS) / total) as u8;
            tracing::debug!(job_id = %progress.job_id(), stage, progress = pct, "Stage finished");
            progress.report(pct);
        }

        let format = payload.options.output_format();
        Ok(OutputDescriptor {
            location: format!("{}/{}.{}", self.output_root, progress.job_id(), format),
            format,
            size_bytes: Self::estimate_size(payload),
            quality: payload.options.quality,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
