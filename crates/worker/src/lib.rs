//! Local worker pool.
//!
//! A fixed set of isolated execution contexts, each a tokio task with its
//! own inbox. Contexts accept one [`ProcessCommand`](protocol::ProcessCommand)
//! at a time and report back over a shared channel of
//! [`WorkerMessage`](protocol::WorkerMessage)s. The actual media work is
//! delegated to a [`LocalProcessor`](processor::LocalProcessor).

pub mod pool;
pub mod processor;
pub mod protocol;

pub use pool::{WorkerPool, WorkerState};
pub use processor::{LocalProcessor, ProgressReporter, StagedProcessor, WorkerError};
pub use protocol::{ProcessCommand, ProcessPayload, WorkerMessage, WorkerMessageKind};
