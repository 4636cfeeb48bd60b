// src/jobs/rate_limit.rs
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quire_traits::SharedClock;
use quire_types::time;
use std::collections::VecDeque;
use std::time::Duration;

/// Caps how many jobs may start per time window, protecting the external
/// renderers from bursts.
///
/// Sliding window over the timestamps of recent starts: no interval of
/// length `window` ever contains more than `starts` of them.
#[derive(Debug)]
pub struct StartLimiter {
    starts: usize,
    window: Duration,
    clock: SharedClock,
    recent: Mutex<VecDeque<DateTime<Utc>>>,
}

impl StartLimiter {
    pub fn new(starts: u32, window: Duration, clock: SharedClock) -> Self {
        let starts = starts.max(1) as usize;
        Self {
            starts,
            window,
            clock,
            recent: Mutex::new(VecDeque::with_capacity(starts)),
        }
    }

    /// `Ok` if a start would be allowed now. Otherwise how long until the
    /// oldest start leaves the window. Takes no slot.
    pub fn check(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut recent = self.recent.lock();
        self.expire(&mut recent, now);
        if recent.len() < self.starts {
            return Ok(());
        }
        let oldest = recent.front().copied().unwrap_or(now);
        Err(time::elapsed(now, time::after(oldest, self.window)))
    }

    /// Takes a slot for a start that happened now.
    pub fn record(&self) {
        let now = self.clock.now();
        let mut recent = self.recent.lock();
        self.expire(&mut recent, now);
        recent.push_back(now);
    }

    fn expire(&self, recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while let Some(&oldest) = recent.front() {
            if time::after(oldest, self.window) > now {
                break;
            }
            recent.pop_front();
        }
    }
}
