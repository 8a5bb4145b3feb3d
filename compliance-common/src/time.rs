//! Timestamp utilities
//!
//! Persisted timestamps are RFC 3339 UTC strings with millisecond precision and a `Z`
//! suffix. Every writer uses the same format so string comparison in SQL orders by time.

use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time, formatted for storage
pub fn now_db() -> String {
    to_db(now())
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
