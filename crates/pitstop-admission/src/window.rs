//! Fixed one-hour windows and the clocks that place requests in them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current time. Shared across requests as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for simulating window rollover.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// The one-hour bucket a request falls into.
///
/// Identified by its start, the instant truncated to the top of the hour.
/// A new hour means a new window and therefore new counter keys; a key is
/// never reused across windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    start: DateTime<Utc>,
}

impl Window {
    /// Window length, and the TTL attached to a counter when it is created.
    pub const TTL: Duration = Duration::from_secs(3600);

    pub fn containing(instant: DateTime<Utc>) -> Self {
        // duration_trunc only fails for out-of-range timestamps; fall back to
        // the instant itself, which still yields a stable hour segment.
        let start = instant
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or(instant);
        Self { start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Hour segment used in counter keys, e.g. `2026-10-16-14`.
    pub fn key_segment(&self) -> String {
        self.start.format("%Y-%m-%d-%H").to_string()
    }

    /// Unix timestamp of the next window boundary.
    pub fn reset_at(&self) -> i64 {
        (self.start + TimeDelta::hours(1)).timestamp()
    }

    #[cfg(test)]
    pub(crate) fn next(&self) -> Self {
        Self {
            start: self.start + TimeDelta::hours(1),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_segment())
    }
}
