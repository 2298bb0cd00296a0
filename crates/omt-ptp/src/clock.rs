//! Outbound timestamp discipline.

use crate::time::TimeSource;

/// Stamps outbound frames of one kind with non-decreasing timestamps,
/// nominally spaced by the frame or audio-chunk interval.
///
/// The current [`TimeSource`] reading is the base; when the source steps
/// backwards (a PTP correction landing mid-stream), the adapter holds the
/// line by advancing one interval from the previous stamp instead.
#[derive(Debug, Clone)]
pub struct ClockAdapter {
    interval_100ns: i64,
    last: Option<i64>,
}

impl ClockAdapter {
    /// Create an adapter with the nominal per-frame interval in 100 ns
    /// units (0 disables spacing and only enforces monotonicity).
    pub fn new(interval_100ns: i64) -> Self {
        Self {
            interval_100ns,
            last: None,
        }
    }

    /// Update the nominal interval (rate change mid-stream).
    pub fn set_interval(&mut self, interval_100ns: i64) {
        self.interval_100ns = interval_100ns;
    }

    /// Produce the next timestamp from `source`.
    pub fn stamp(&mut self, source: &dyn TimeSource) -> i64 {
        let now = source.now_100ns();
        let stamp = match self.last {
            Some(last) if now <= last => last + self.interval_100ns.max(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }

    /// Forget the previous stamp (stream restart).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Scriptable time source for driving the adapter in tests.
    struct FakeSource(AtomicI64);

    impl FakeSource {
        fn set(&self, value: i64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl TimeSource for FakeSource {
        fn now_100ns(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
        fn elapsed_ms(&self) -> i64 {
            0
        }
        fn is_synchronized(&self) -> bool {
            true
        }
        fn offset_microseconds(&self) -> f64 {
            0.0
        }
        fn reset(&self) {}
    }

    #[test]
    fn test_follows_advancing_source() {
        let source = FakeSource(AtomicI64::new(1_000));
        let mut adapter = ClockAdapter::new(333_333);

        assert_eq!(adapter.stamp(&source), 1_000);
        source.set(400_000);
        assert_eq!(adapter.stamp(&source), 400_000);
    }

    #[test]
    fn test_never_regresses_on_step() {
        let source = FakeSource(AtomicI64::new(1_000_000));
        let mut adapter = ClockAdapter::new(333_333);

        let first = adapter.stamp(&source);
        // Source steps backwards by 0.5 s
        source.set(995_000_000 - 1_000_000_000);
        let second = adapter.stamp(&source);
        let third = adapter.stamp(&source);

        assert!(second > first, "timestamp regressed after step");
        assert_eq!(second, first + 333_333);
        assert_eq!(third, second + 333_333);
    }

    #[test]
    fn test_recovers_once_source_catches_up() {
        let source = FakeSource(AtomicI64::new(100));
        let mut adapter = ClockAdapter::new(10);

        adapter.stamp(&source);
        source.set(50); // behind: interval spacing
        assert_eq!(adapter.stamp(&source), 110);
        source.set(1_000_000); // ahead again: back to source time
        assert_eq!(adapter.stamp(&source), 1_000_000);
    }
}
