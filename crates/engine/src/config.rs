use std::str::FromStr;
use std::time::Duration;

use kazi_remote::poller::{PollConfig, RetryBackoff};

use crate::registry::DEFAULT_JOB_RETENTION;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; a malformed
/// value falls back to its default with a warning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of local worker contexts (default: `3`).
    pub worker_pool_size: usize,
    /// Content strictly below this size may run locally (default: 50 MiB).
    pub local_size_threshold_bytes: u64,
    /// Submissions above this size are rejected (default: 2 GiB).
    pub max_content_bytes: u64,
    /// Base URL of the processing service. `None` means local only.
    pub remote_api_url: Option<String>,
    /// Per-request timeout for calls to the processing service.
    pub submit_timeout: Duration,
    /// Remote status polling cadence, backoff and budget.
    pub poll: PollConfig,
    /// Wall-clock limit for one local job.
    pub local_job_timeout: Duration,
    /// Simulated duration of each local processing stage.
    pub stage_delay: Duration,
    pub analysis_cache_ttl: Duration,
    pub analysis_cache_max_entries: usize,
    /// Directory local outputs are written under.
    pub output_root: String,
    /// Whether thumbnails carry platform branding.
    pub thumbnail_branding: bool,
    /// Broadcast buffer of the event bus.
    pub event_capacity: usize,
    /// Finished jobs kept in the registry before the oldest are dropped.
    pub job_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 3,
            local_size_threshold_bytes: 50 * 1024 * 1024,
            max_content_bytes: 2 * 1024 * 1024 * 1024,
            remote_api_url: None,
            submit_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
            local_job_timeout: Duration::from_secs(600),
            stage_delay: Duration::from_millis(500),
            analysis_cache_ttl: Duration::from_secs(3600),
            analysis_cache_max_entries: 100,
            output_root: "/var/lib/kazi/output".to_string(),
            thumbnail_branding: true,
            event_capacity: 1024,
            job_retention: DEFAULT_JOB_RETENTION,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                |
    /// |-------------------------------|------------------------|
    /// | `WORKER_POOL_SIZE`            | `3`                    |
    /// | `LOCAL_SIZE_THRESHOLD_BYTES`  | `52428800`             |
    /// | `MAX_CONTENT_BYTES`           | `2147483648`           |
    /// | `REMOTE_API_URL`              | unset                  |
    /// | `SUBMIT_TIMEOUT_SECS`         | `30`                   |
    /// | `POLL_INTERVAL_MS`            | `2000`                 |
    /// | `POLL_RETRY_DELAY_MS`         | `5000`                 |
    /// | `POLL_RETRY_MAX_DELAY_MS`     | `60000`                |
    /// | `POLL_MAX_FAILURES`           | `10`                   |
    /// | `POLL_TIMEOUT_SECS`           | `1800`                 |
    /// | `LOCAL_JOB_TIMEOUT_SECS`      | `600`                  |
    /// | `STAGE_DELAY_MS`              | `500`                  |
    /// | `ANALYSIS_CACHE_TTL_SECS`     | `3600`                 |
    /// | `ANALYSIS_CACHE_MAX_ENTRIES`  | `100`                  |
    /// | `OUTPUT_ROOT`                 | `/var/lib/kazi/output` |
    /// | `THUMBNAIL_BRANDING`          | `true`                 |
    /// | `EVENT_CAPACITY`              | `1024`                 |
    /// | `JOB_RETENTION`               | `1000`                 |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let default_retry = defaults.poll.retry.clone();

        let remote_api_url = lookup("REMOTE_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let poll = PollConfig {
            interval: Duration::from_millis(parse_or(
                &lookup,
                "POLL_INTERVAL_MS",
                defaults.poll.interval.as_millis() as u64,
            )),
            retry: RetryBackoff {
                initial_delay: Duration::from_millis(parse_or(
                    &lookup,
                    "POLL_RETRY_DELAY_MS",
                    default_retry.initial_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(parse_or(
                    &lookup,
                    "POLL_RETRY_MAX_DELAY_MS",
                    default_retry.max_delay.as_millis() as u64,
                )),
                multiplier: default_retry.multiplier,
            },
            max_consecutive_failures: parse_or(
                &lookup,
                "POLL_MAX_FAILURES",
                defaults.poll.max_consecutive_failures,
            )
            .max(1),
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "POLL_TIMEOUT_SECS",
                defaults.poll.timeout.as_secs(),
            )),
        };

        Self {
            worker_pool_size: parse_or(&lookup, "WORKER_POOL_SIZE", defaults.worker_pool_size)
                .max(1),
            local_size_threshold_bytes: parse_or(
                &lookup,
                "LOCAL_SIZE_THRESHOLD_BYTES",
                defaults.local_size_threshold_bytes,
            ),
            max_content_bytes: parse_or(&lookup, "MAX_CONTENT_BYTES", defaults.max_content_bytes),
            remote_api_url,
            submit_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SUBMIT_TIMEOUT_SECS",
                defaults.submit_timeout.as_secs(),
            )),
            poll,
            local_job_timeout: Duration::from_secs(parse_or(
                &lookup,
                "LOCAL_JOB_TIMEOUT_SECS",
                defaults.local_job_timeout.as_secs(),
            )),
            stage_delay: Duration::from_millis(parse_or(
                &lookup,
                "STAGE_DELAY_MS",
                defaults.stage_delay.as_millis() as u64,
            )),
            analysis_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "ANALYSIS_CACHE_TTL_SECS",
                defaults.analysis_cache_ttl.as_secs(),
            )),
            analysis_cache_max_entries: parse_or(
                &lookup,
                "ANALYSIS_CACHE_MAX_ENTRIES",
                defaults.analysis_cache_max_entries,
            ),
            output_root: lookup("OUTPUT_ROOT").unwrap_or(defaults.output_root),
            thumbnail_branding: parse_or(
                &lookup,
                "THUMBNAIL_BRANDING",
                defaults.thumbnail_branding,
            ),
            event_capacity: parse_or(&lookup, "EVENT_CAPACITY", defaults.event_capacity),
            job_retention: parse_or(&lookup, "JOB_RETENTION", defaults.job_retention),
        }
    }
}

/// Parse `key` or fall back to `default`, warning when a value is present
/// but malformed.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
                default
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
