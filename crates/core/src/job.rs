//! Job record and its lifecycle state machine.
//!
//! A job moves `queued -> processing -> {completed, failed, cancelled}` and
//! nothing else. The transition methods on [`Job`] are the only way to
//! change its status, so a terminal job can never be mutated again.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::media::{MediaContent, MediaFormat, OptimizationFlags, ProcessingOptions, Quality, Resolution};
use crate::types::{JobId, Timestamp};

/// Highest progress value a job can report.
pub const MAX_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// What was submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Source reference (the original file name).
    pub source: String,
    pub format: MediaFormat,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub resolution: Option<Resolution>,
}

impl From<&MediaContent> for InputDescriptor {
    fn from(content: &MediaContent) -> Self {
        Self {
            source: content.name.clone(),
            format: content.format,
            size_bytes: content.size_bytes(),
            duration_secs: content.duration_secs,
            resolution: content.resolution,
        }
    }
}

/// What was produced. Local and remote paths both report this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub location: String,
    pub format: MediaFormat,
    pub size_bytes: u64,
    pub quality: Quality,
}

/// Audience a piece of content is judged to target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAudience {
    #[default]
    General,
    Tourists,
    Youth,
    Business,
    Local,
}

/// Descriptive metadata plus the tags derived from it at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Filled in by the engine from keyword matching.
    pub cultural_tags: Vec<String>,
    pub target_audience: TargetAudience,
}

impl JobMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Which execution path owns a job once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Route {
    Local { worker: usize },
    /// `remote_job_id` is set once the service accepts the submission.
    Remote { remote_job_id: Option<String> },
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One unit of submitted processing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub input: InputDescriptor,
    pub output: Option<OutputDescriptor>,
    pub options: ProcessingOptions,
    pub metadata: JobMetadata,
    pub route: Option<Route>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl Job {
    /// A freshly submitted job in the `queued` state.
    pub fn new(
        id: JobId,
        input: InputDescriptor,
        options: ProcessingOptions,
        metadata: JobMetadata,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            input,
            output: None,
            options,
            metadata,
            route: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn optimizations(&self) -> &OptimizationFlags {
        &self.options.optimizations
    }

    /// `queued -> processing`, recording which path owns the job.
    pub fn start(&mut self, route: Route) -> Result<(), CoreError> {
        self.transition(JobStatus::Processing)?;
        self.route = Some(route);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the service-assigned id once a remote submission is accepted.
    pub fn assign_remote_id(&mut self, remote_job_id: impl Into<String>) -> Result<(), CoreError> {
        match (&mut self.route, self.status) {
            (Some(Route::Remote { remote_job_id: slot }), JobStatus::Processing) => {
                *slot = Some(remote_job_id.into());
                Ok(())
            }
            _ => Err(CoreError::Validation(format!(
                "Job {} is not an in-flight remote job",
                self.id
            ))),
        }
    }

    /// Record a progress report.
    ///
    /// Values are clamped to 100. Returns the new value if it moved
    /// forward, `None` if it was equal to or below the current value.
    pub fn advance_progress(&mut self, progress: u8) -> Result<Option<u8>, CoreError> {
        if self.status != JobStatus::Processing {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        let progress = progress.min(MAX_PROGRESS);
        if progress <= self.progress {
            return Ok(None);
        }
        self.progress = progress;
        Ok(Some(progress))
    }

    /// `processing -> completed`.
    pub fn complete(&mut self, output: OutputDescriptor) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.progress = MAX_PROGRESS;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `processing -> failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `processing -> cancelled`.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
