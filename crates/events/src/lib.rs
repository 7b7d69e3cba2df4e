//! Kazi job event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub with synchronous
//!   listeners and `tokio::sync::broadcast` receivers.
//! - [`JobEvent`]: the lifecycle event envelope (progress, completed,
//!   error, cancelled).

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind, ListenerId};
