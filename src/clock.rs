// src/clock.rs
use chrono::{DateTime, Utc};
use quire_traits::Clock;
use tokio::time::Instant;

/// Wall-clock time that advances with the tokio timer.
///
/// Anchored once to `Utc::now()` and then moved forward by tokio's
/// monotonic `Instant`, so TTLs, backoff deadlines and the worker's sleeps
/// all agree, including under a paused test runtime.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    base_wall: DateTime<Utc>,
    base_instant: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            base_wall: Utc::now(),
            base_instant: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        quire_types::time::after(self.base_wall, self.base_instant.elapsed())
    }
}
