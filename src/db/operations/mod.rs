pub mod concepts;
pub mod events;
pub mod progress;
pub mod sessions;

use chrono::{DateTime, TimeZone, Utc};

/// Timestamps are stored as epoch milliseconds so they sort numerically.
pub fn to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_millis(value: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(value)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current time at the precision the store keeps.
pub fn store_now() -> DateTime<Utc> {
    from_millis(to_millis(Utc::now()))
}

pub fn from_millis_opt(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.map(from_millis)
}
