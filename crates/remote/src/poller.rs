//! Polling state machine for a job running on the processing service.
//!
//! [`PollTracker`] is pure bookkeeping: the caller performs each
//! `GET /status` call, hands the result to [`PollTracker::observe`], and
//! acts on the returned [`PollDecision`] (update progress, finish the job,
//! or sleep and poll again). Keeping I/O out of here lets the retry budget
//! and deadline be tested with a paused clock.
//!
//! Rules:
//!
//! - `queued`/`processing`: report progress, poll again after
//!   [`PollConfig::interval`].
//! - `completed` with output: done. `completed` without output: failed.
//! - `failed`: failed with the service's error message.
//! - call error: retry after a delay computed from the number of consecutive
//!   failures (see [`RetryBackoff::delay_for`]), so a successful call resets
//!   it.
//! - `max_consecutive_failures` failed calls in a row, or `timeout` elapsed
//!   since the tracker was created while the job is still running:
//!   exhausted.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::RemoteApiError;
use crate::messages::{RemoteOutput, RemoteStatus, StatusResponse};

/// Retry delay after failed status calls.
///
/// The delay for the `n`th consecutive failure is
/// `initial_delay * multiplier^(n - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryBackoff {
    /// Delay before retrying after `attempt` consecutive failures (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        // powi overflows to infinity long before the attempt counter wraps.
        Duration::try_from_secs_f64(secs.min(max)).unwrap_or(self.max_delay)
    }
}

/// Tunables for the poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between successful polls.
    pub interval: Duration,
    /// Backoff applied after failed polls.
    pub retry: RetryBackoff,
    /// Consecutive failed polls tolerated before giving up.
    pub max_consecutive_failures: u32,
    /// Wall-clock budget for the whole polling phase.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            retry: RetryBackoff::default(),
            max_consecutive_failures: 10,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// What the caller should do after a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    /// Still running; record `progress` and poll again after `next_poll`.
    Continue { progress: u8, next_poll: Duration },
    /// Finished successfully.
    Completed(RemoteOutput),
    /// Finished with a failure reported by the service.
    Failed(String),
    /// The call failed; poll again after `next_poll`.
    Retry {
        error: String,
        attempt: u32,
        next_poll: Duration,
    },
    /// Retry budget or deadline used up.
    Exhausted(String),
}

/// Tracks retry budget and deadline for one remote job.
#[derive(Debug)]
pub struct PollTracker {
    config: PollConfig,
    started_at: Instant,
    consecutive_failures: u32,
}

impl PollTracker {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            consecutive_failures: 0,
        }
    }

    /// Delay before the very first poll.
    pub fn first_delay(&self) -> Duration {
        self.config.interval
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.config.timeout.saturating_sub(self.started_at.elapsed())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn deadline_passed(&self) -> bool {
        self.started_at.elapsed() >= self.config.timeout
    }

    fn timeout_message(&self) -> String {
        format!(
            "Remote processing did not finish within {}s",
            self.config.timeout.as_secs()
        )
    }

    /// Feed the outcome of one status call into the state machine.
    pub fn observe(&mut self, result: Result<StatusResponse, RemoteApiError>) -> PollDecision {
        match result {
            Ok(response) => {
                self.consecutive_failures = 0;
                self.on_status(response)
            }
            Err(e) => self.on_error(&e),
        }
    }

    fn on_status(&self, response: StatusResponse) -> PollDecision {
        match response.status {
            RemoteStatus::Queued | RemoteStatus::Processing => {
                if self.deadline_passed() {
                    return PollDecision::Exhausted(self.timeout_message());
                }
                PollDecision::Continue {
                    progress: response.progress.min(100),
                    next_poll: self.config.interval.min(self.remaining()),
                }
            }
            RemoteStatus::Completed => match response.output {
                Some(output) => PollDecision::Completed(output),
                None => PollDecision::Failed(
                    "Remote service reported completion without an output".to_string(),
                ),
            },
            RemoteStatus::Failed => PollDecision::Failed(
                response
                    .error
                    .unwrap_or_else(|| "Remote processing failed".to_string()),
            ),
        }
    }

    fn on_error(&mut self, error: &RemoteApiError) -> PollDecision {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            return PollDecision::Exhausted(format!(
                "Gave up after {} consecutive failed status polls: {error}",
                self.consecutive_failures
            ));
        }
        if self.deadline_passed() {
            return PollDecision::Exhausted(self.timeout_message());
        }

        let delay = self.config.retry.delay_for(self.consecutive_failures);
        PollDecision::Retry {
            error: error.to_string(),
            attempt: self.consecutive_failures,
            next_poll: delay.min(self.remaining()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
