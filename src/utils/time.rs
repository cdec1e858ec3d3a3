// src/utils/time.rs

use chrono::{DateTime, Utc};

/// Gets the current UTC date and time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Epoch milliseconds of a sample taken `offset_seconds` after `started_at`.
pub fn offset_to_epoch_ms(started_at: DateTime<Utc>, offset_seconds: u64) -> i64 {
    started_at.timestamp_millis() + (offset_seconds as i64) * 1000
}
