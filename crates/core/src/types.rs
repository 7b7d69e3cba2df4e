/// Opaque job identifier, assigned at submission.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh, time-ordered job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
