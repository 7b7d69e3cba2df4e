//! Message type constants for job lifecycle events.
//!
//! Used as the `type` field when a job event is rendered to JSON for a
//! WebSocket or webhook consumer.

/// Progress update during job execution.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by user or shutdown).
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";
