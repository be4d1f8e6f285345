/// Download requests are keyed by time-ordered UUIDs (v7).
pub type RequestId = uuid::Uuid;

/// Opaque owner identifier handed to us by the auth provider.
pub type UserId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new request id.
pub fn new_request_id() -> RequestId {
    uuid::Uuid::now_v7()
}
