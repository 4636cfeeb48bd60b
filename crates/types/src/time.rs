use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// `now + d`, clamped to the largest representable instant instead of
/// panicking on overflow.
pub fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Elapsed time from `earlier` to `later`, zero if `later` is not after it.
pub fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
