//! Fixed-size pool of worker contexts.
//!
//! Contexts are spawned once by [`WorkerPool::spawn`] and live until
//! [`WorkerPool::shutdown`]. The pool keeps an explicit
//! [`WorkerState`] per context and never queues: [`WorkerPool::try_acquire`]
//! either claims an idle context or returns `None`. A claimed context stays
//! `Busy` until the engine calls [`WorkerPool::release`] after handling the
//! job's terminal message.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::processor::{LocalProcessor, ProgressReporter, WorkerError};
use crate::protocol::{ProcessCommand, WorkerMessage, WorkerMessageKind};

/// How long [`WorkerPool::shutdown`] waits for each context to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Availability of one worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
}

/// Handle to the pool's worker contexts.
pub struct WorkerPool {
    inboxes: Vec<mpsc::Sender<ProcessCommand>>,
    states: Mutex<Vec<WorkerState>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Cancelled at shutdown; stops every context loop.
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` contexts (minimum 1) that run jobs through `processor`.
    ///
    /// Returns the pool and the receiving end of the channel every context
    /// reports on. Each job is cut off after `job_timeout`.
    pub fn spawn(
        size: usize,
        processor: Arc<dyn LocalProcessor>,
        job_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let size = size.max(1);
        let (outbox, messages) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut inboxes = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            // Capacity 1: a context holds at most one job.
            let (tx, rx) = mpsc::channel(1);
            inboxes.push(tx);
            handles.push(tokio::spawn(run_context(
                index,
                Arc::clone(&processor),
                rx,
                outbox.clone(),
                job_timeout,
                shutdown.clone(),
            )));
        }

        tracing::info!(size, job_timeout_secs = job_timeout.as_secs(), "Worker pool started");

        let pool = Self {
            inboxes,
            states: Mutex::new(vec![WorkerState::Idle; size]),
            handles: Mutex::new(handles),
            shutdown,
        };
        (pool, messages)
    }

    pub fn size(&self) -> usize {
        self.inboxes.len()
    }

    pub fn idle_count(&self) -> usize {
        self.lock_states()
            .iter()
            .filter(|s| **s == WorkerState::Idle)
            .count()
    }

    pub fn state(&self, worker: usize) -> Option<WorkerState> {
        self.lock_states().get(worker).copied()
    }

    /// Claim the lowest-numbered idle context, marking it busy.
    pub fn try_acquire(&self) -> Option<usize> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let mut states = self.lock_states();
        let index = states.iter().position(|s| *s == WorkerState::Idle)?;
        states[index] = WorkerState::Busy;
        Some(index)
    }

    /// Hand a job to a context previously claimed with
    /// [`try_acquire`](Self::try_acquire).
    ///
    /// On failure the context is released again.
    pub fn dispatch(&self, worker: usize, command: ProcessCommand) -> Result<(), WorkerError> {
        let inbox = self
            .inboxes
            .get(worker)
            .ok_or(WorkerError::Unavailable(worker))?;
        if let Err(e) = inbox.try_send(command) {
            tracing::warn!(worker, error = %e, "Worker rejected job");
            self.release(worker);
            return Err(WorkerError::Unavailable(worker));
        }
        Ok(())
    }

    /// Return a context to the idle set.
    pub fn release(&self, worker: usize) {
        if let Some(state) = self.lock_states().get_mut(worker) {
            *state = WorkerState::Idle;
        }
    }

    /// Stop every context and wait up to 5 seconds per context for a
    /// clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down worker pool");
        self.shutdown.cancel();

        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for (worker, handle) in handles.into_iter().enumerate() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!(worker, "Worker context did not exit in time");
            }
        }

        tracing::info!("Worker pool shut down complete");
    }

    fn lock_states(&self) -> MutexGuard<'_, Vec<WorkerState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Body of one worker context: take a job, run it, report the outcome.
async fn run_context(
    index: usize,
    processor: Arc<dyn LocalProcessor>,
    mut inbox: mpsc::Receiver<ProcessCommand>,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
    job_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = inbox.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let job_id = command.job_id;
        tracing::info!(worker = index, %job_id, "Worker picked up job");
        let reporter = ProgressReporter::new(index, job_id, outbox.clone());

        // A panicking processor fails its job instead of taking the context down.
        let work = AssertUnwindSafe(processor.process(&command.payload, &reporter))
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|payload| {
                    Err(WorkerError::Execution(format!(
                        "processor panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                })
            });

        let result = tokio::select! {
            _ = command.cancel.cancelled() => Err(WorkerError::Cancelled),
            outcome = tokio::time::timeout(job_timeout, work) => {
                outcome.unwrap_or(Err(WorkerError::TimedOut(job_timeout)))
            }
        };

        let kind = match result {
            Ok(output) => WorkerMessageKind::Completed(output),
            Err(WorkerError::Cancelled) => WorkerMessageKind::Cancelled,
            Err(e) => {
                tracing::warn!(worker = index, %job_id, error = %e, "Local job failed");
                WorkerMessageKind::Error(e.to_string())
            }
        };

        if outbox
            .send(WorkerMessage {
                worker: index,
                job_id,
                kind,
            })
            .is_err()
        {
            tracing::debug!(worker = index, "Engine gone, worker exiting");
            break;
        }
    }
    tracing::debug!(worker = index, "Worker context exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
