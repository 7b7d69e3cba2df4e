//! In-process job event bus.
//!
//! [`EventBus`] fans every [`JobEvent`] out to two kinds of subscriber:
//!
//! - synchronous listeners registered with [`EventBus::listen`], invoked
//!   inline on the publishing task before `publish` returns;
//! - async receivers from [`EventBus::subscribe`], backed by a
//!   `tokio::sync::broadcast` channel.
//!
//! Neither kind sees events published before it subscribed. A listener
//! that panics is logged and skipped; the remaining listeners and the
//! broadcast still run. Share the bus via `Arc<EventBus>`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use kazi_core::job::OutputDescriptor;
use kazi_core::job_events::{
    MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_PROGRESS,
};
use kazi_core::types::JobId;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobEventKind {
    Progress { progress: u8 },
    Completed { output: OutputDescriptor },
    Error { error: String },
    Cancelled,
}

/// A lifecycle event for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(job_id: JobId, progress: u8) -> Self {
        Self::new(job_id, JobEventKind::Progress { progress })
    }

    pub fn completed(job_id: JobId, output: OutputDescriptor) -> Self {
        Self::new(job_id, JobEventKind::Completed { output })
    }

    pub fn error(job_id: JobId, error: impl Into<String>) -> Self {
        Self::new(
            job_id,
            JobEventKind::Error {
                error: error.into(),
            },
        )
    }

    pub fn cancelled(job_id: JobId) -> Self {
        Self::new(job_id, JobEventKind::Cancelled)
    }

    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, JobEventKind::Progress { .. })
    }

    /// WebSocket message type for this event.
    pub fn message_type(&self) -> &'static str {
        match self.kind {
            JobEventKind::Progress { .. } => MSG_TYPE_JOB_PROGRESS,
            JobEventKind::Completed { .. } => MSG_TYPE_JOB_COMPLETED,
            JobEventKind::Error { .. } => MSG_TYPE_JOB_FAILED,
            JobEventKind::Cancelled => MSG_TYPE_JOB_CANCELLED,
        }
    }

    /// Render as the JSON message pushed to browser clients.
    pub fn to_message(&self) -> serde_json::Value {
        let mut message = serde_json::json!({
            "type": self.message_type(),
            "job_id": self.job_id,
            "timestamp": self.timestamp,
        });
        match &self.kind {
            JobEventKind::Progress { progress } => {
                message["progress"] = serde_json::json!(progress);
            }
            JobEventKind::Completed { output } => {
                message["output"] = serde_json::json!(output);
            }
            JobEventKind::Error { error } => {
                message["error"] = serde_json::json!(error);
            }
            JobEventKind::Cancelled => {}
        }
        message
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Handle returned by [`EventBus::listen`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl EventBus {
    /// Create a bus with a specific broadcast capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`. Synchronous
    /// listeners are unaffected by the capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Publish an event to every current listener and receiver.
    ///
    /// Listeners run inline, in registration order, before this returns.
    pub fn publish(&self, event: JobEvent) {
        // Snapshot so a listener may call listen/unlisten without deadlock.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(
                    job_id = %event.job_id,
                    kind = event.message_type(),
                    "Event listener panicked",
                );
            }
        }

        tracing::trace!(
            job_id = %event.job_id,
            kind = event.message_type(),
            listeners = listeners.len(),
            "Published job event",
        );

        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Register a synchronous listener.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Subscribe an async receiver to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
