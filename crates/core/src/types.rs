/// Remote task identifiers are opaque strings assigned by the service.
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
