//! Single place that reads wall-clock time, so every `timestamp_ns` in the
//! crate is produced the same way.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
