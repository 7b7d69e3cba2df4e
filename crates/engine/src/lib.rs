//! Kazi media job engine.
//!
//! Accepts media processing jobs, routes each one to the local
//! [`WorkerPool`](kazi_worker::WorkerPool) or the remote processing
//! service, tracks it through `queued -> processing -> terminal`, and
//! publishes every change on the [`EventBus`](kazi_events::EventBus).
//!
//! - [`Engine`]: the dispatcher and public surface.
//! - [`JobRegistry`]: in-memory job store.
//! - [`EngineConfig`]: environment-driven configuration.
//! - [`EngineError`]: error taxonomy for every public operation.

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;

pub use config::EngineConfig;
pub use engine::{Engine, EngineDeps, EngineStats};
pub use error::EngineError;
pub use registry::JobRegistry;
