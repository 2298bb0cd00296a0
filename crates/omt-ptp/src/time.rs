//! Pluggable time sources.
//!
//! Everything that stamps frames does so through a [`TimeSource`], so a
//! sender can run free on the local clock or disciplined by a PTP
//! follower without the media path knowing the difference.

use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::follower::PtpFollower;

/// A source of 100 ns timestamps.
pub trait TimeSource: Send + Sync {
    /// Current reading in 100 ns units.
    fn now_100ns(&self) -> i64;

    /// Milliseconds elapsed since construction or the last `reset`.
    fn elapsed_ms(&self) -> i64;

    /// Whether the source tracks an external reference.
    fn is_synchronized(&self) -> bool;

    /// Last measured offset from the reference, in microseconds.
    fn offset_microseconds(&self) -> f64;

    /// Restart the epoch.
    fn reset(&self);
}

struct LocalEpoch {
    start: Instant,
    base_100ns: i64,
}

impl LocalEpoch {
    fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            start: Instant::now(),
            base_100ns: (wall.as_nanos() / 100) as i64,
        }
    }
}

/// Free-running monotonic clock, anchored to the wall clock at
/// construction so timestamps are meaningful across hosts.
pub struct LocalTimeSource {
    epoch: Mutex<LocalEpoch>,
}

impl LocalTimeSource {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(LocalEpoch::now()),
        }
    }
}

impl Default for LocalTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for LocalTimeSource {
    fn now_100ns(&self) -> i64 {
        let epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        epoch.base_100ns + (epoch.start.elapsed().as_nanos() / 100) as i64
    }

    fn elapsed_ms(&self) -> i64 {
        let epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        epoch.start.elapsed().as_millis() as i64
    }

    fn is_synchronized(&self) -> bool {
        false
    }

    fn offset_microseconds(&self) -> f64 {
        0.0
    }

    fn reset(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        *epoch = LocalEpoch::now();
    }
}

/// Local clock disciplined by a PTP follower: the follower's accumulated
/// correction is subtracted from every reading, tracking the grandmaster.
pub struct PtpTimeSource {
    local: LocalTimeSource,
    follower: Arc<PtpFollower>,
}

impl PtpTimeSource {
    pub fn new(follower: Arc<PtpFollower>) -> Self {
        Self {
            local: LocalTimeSource::new(),
            follower,
        }
    }
}

impl TimeSource for PtpTimeSource {
    fn now_100ns(&self) -> i64 {
        self.local.now_100ns() - self.follower.clock_correction_100ns()
    }

    fn elapsed_ms(&self) -> i64 {
        self.local.elapsed_ms()
    }

    fn is_synchronized(&self) -> bool {
        self.follower.is_synchronized()
    }

    fn offset_microseconds(&self) -> f64 {
        self.follower.offset_microseconds()
    }

    fn reset(&self) {
        self.local.reset();
    }
}
