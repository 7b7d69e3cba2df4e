//! Domain types and pure logic shared by every Kazi crate.
//!
//! Nothing in here performs I/O. The job model and its state machine,
//! content fingerprints, keyword analysis and the TTL cache live here so
//! that the worker, remote and engine crates agree on one vocabulary.

pub mod analysis;
pub mod cache;
pub mod error;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod media;
pub mod types;
