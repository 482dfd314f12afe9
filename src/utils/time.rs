use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall clock in nanoseconds since the unix epoch.
///
/// Only the leader-side ticker and the log store's appended-at stamp read
/// the wall clock; command handlers must use the replicated clock.
pub(crate) fn now_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}
