//! Messages exchanged between the engine and worker contexts.
//!
//! Engine -> worker: [`ProcessCommand`] (`{job_id, type: "process",
//! payload}`). Worker -> engine: [`WorkerMessage`] carrying progress, the
//! finished output, an error, or a cancellation acknowledgement. Every job
//! produces exactly one terminal message.

use std::sync::Arc;

use kazi_core::job::OutputDescriptor;
use kazi_core::media::{MediaContent, ProcessingOptions};
use kazi_core::types::JobId;
use tokio_util::sync::CancellationToken;

/// What a worker needs to process one job.
#[derive(Debug, Clone)]
pub struct ProcessPayload {
    pub content: Arc<MediaContent>,
    pub options: ProcessingOptions,
}

/// Instruction to process one job.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub job_id: JobId,
    pub payload: ProcessPayload,
    /// Triggered when the job is cancelled or the engine shuts down.
    pub cancel: CancellationToken,
}

/// Report from a worker context.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    /// Index of the reporting context within the pool.
    pub worker: usize,
    pub job_id: JobId,
    pub kind: WorkerMessageKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessageKind {
    Progress(u8),
    Completed(OutputDescriptor),
    Error(String),
    Cancelled,
}

impl WorkerMessageKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}
