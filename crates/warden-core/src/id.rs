use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const MAX_ID_LEN: usize = 64;

/// Generates a primary key for a new row.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Checks the primary-key format: 1 to 64 ASCII alphanumerics, `-` or `_`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Current time truncated to microseconds, the resolution timestamps are
/// stored and compared at.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
