/// Account and ledger primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Jobs are identified by an opaque UUID generated at submission time.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
