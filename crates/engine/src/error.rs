use kazi_core::error::CoreError;
use kazi_core::job::JobStatus;
use kazi_core::types::JobId;
use kazi_remote::api::RemoteApiError;
use kazi_worker::WorkerError;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The submitted content or parameters are invalid.
    #[error("Invalid input: {0}")]
    Input(String),

    /// No execution path could take the job.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Worker execution failed: {0}")]
    WorkerExecution(String),

    /// The processing service refused the request.
    #[error("Remote submission failed: {0}")]
    RemoteSubmission(String),

    #[error("Remote status poll failed: {0}")]
    RemotePoll(String),

    /// A retry budget or deadline ran out.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Content analysis failed: {0}")]
    Analysis(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map a failed call to the processing service made while submitting.
    ///
    /// Transient failures mean the service is unreachable, so the job could
    /// not be dispatched; anything else is the service rejecting it.
    pub fn from_submission(error: RemoteApiError) -> Self {
        if error.is_transient() {
            Self::Dispatch(format!("processing service unreachable: {error}"))
        } else {
            Self::RemoteSubmission(error.to_string())
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(id) => Self::NotFound(id),
            CoreError::Validation(msg) => Self::Input(msg),
            CoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            CoreError::Analysis(msg) => Self::Analysis(msg),
            CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<WorkerError> for EngineError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Unavailable(_) => Self::Dispatch(err.to_string()),
            WorkerError::TimedOut(_) => Self::Timeout(err.to_string()),
            other => Self::WorkerExecution(other.to_string()),
        }
    }
}
