//! Client for the external media processing service.
//!
//! Provides typed wire messages, an HTTP client behind the
//! [`ProcessingService`](api::ProcessingService) trait, and the pure polling
//! state machine ([`PollTracker`](poller::PollTracker)) with its retry
//! backoff that the engine drives while a remote job is in flight.

pub mod api;
pub mod messages;
pub mod poller;
