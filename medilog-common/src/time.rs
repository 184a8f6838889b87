//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way the store persists it.
///
/// RFC 3339 with microsecond precision, always UTC. Timestamps in this format
/// compare lexicographically, which is what keeps the snapshot ordering query
/// total without per-row tie-breaking.
pub fn to_store_format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp persisted by the store
pub fn from_store_format(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
