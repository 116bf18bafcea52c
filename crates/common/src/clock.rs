//! Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
///
/// A clock set before the epoch reads as 0, which makes every cached token
/// look stale and forces a refresh rather than trusting it.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
