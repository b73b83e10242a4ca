//! This module provide some utility functions.
//!

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current wall clock time as the number of milliseconds elapsed
/// since the UNIX epoch. This function panics if the system clock reports a
/// time before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("failed to measure elapsed time since UNIX_EPOCH")
        .as_millis() as u64
}

/// Convert a timestamp or counter into the signed representation sqlite
/// stores integers in.
pub fn to_db_int(value: u64) -> i64 {
    value as i64
}

/// Convert a signed sqlite integer back into the unsigned domain
/// representation. Negative values clamp to zero rather than wrapping.
pub fn from_db_int(value: i64) -> u64 {
    if value < 0 {
        0
    } else {
        value as u64
    }
}
