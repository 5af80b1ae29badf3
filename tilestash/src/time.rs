//! Time source for cache freshness bookkeeping.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
