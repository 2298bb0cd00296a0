//! Per-channel traffic counters.

/// Monotonic counters plus deltas since the last snapshot. Cumulative
/// counters only grow; `snapshot()` returns a copy and zeroes the
/// `*_since_last` fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatistics {
    /// Frames written to the transport
    pub frames_sent: u64,
    /// Frames surfaced from the transport
    pub frames_received: u64,
    /// Frames dropped (pool exhaustion, codec failure, oversize)
    pub frames_dropped: u64,
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Bytes surfaced from the transport
    pub bytes_received: u64,

    /// Frames sent since the last snapshot
    pub frames_sent_since_last: u64,
    /// Frames received since the last snapshot
    pub frames_received_since_last: u64,
    /// Frames dropped since the last snapshot
    pub frames_dropped_since_last: u64,
    /// Bytes sent since the last snapshot
    pub bytes_sent_since_last: u64,
    /// Bytes received since the last snapshot
    pub bytes_received_since_last: u64,
}

impl ChannelStatistics {
    /// Record one outbound frame of `bytes` wire bytes.
    pub fn record_sent(&mut self, bytes: u64) {
        self.frames_sent += 1;
        self.bytes_sent += bytes;
        self.frames_sent_since_last += 1;
        self.bytes_sent_since_last += bytes;
    }

    /// Record one inbound frame of `bytes` wire bytes.
    pub fn record_received(&mut self, bytes: u64) {
        self.frames_received += 1;
        self.bytes_received += bytes;
        self.frames_received_since_last += 1;
        self.bytes_received_since_last += bytes;
    }

    /// Record one dropped frame.
    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
        self.frames_dropped_since_last += 1;
    }

    /// Snapshot-and-reset: returns the current counters and zeroes the
    /// deltas in place.
    pub fn snapshot(&mut self) -> ChannelStatistics {
        let copy = *self;
        self.frames_sent_since_last = 0;
        self.frames_received_since_last = 0;
        self.frames_dropped_since_last = 0;
        self.bytes_sent_since_last = 0;
        self.bytes_received_since_last = 0;
        copy
    }

    /// Fold another channel's counters into this aggregate.
    pub fn merge(&mut self, other: &ChannelStatistics) {
        self.frames_sent += other.frames_sent;
        self.frames_received += other.frames_received;
        self.frames_dropped += other.frames_dropped;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.frames_sent_since_last += other.frames_sent_since_last;
        self.frames_received_since_last += other.frames_received_since_last;
        self.frames_dropped_since_last += other.frames_dropped_since_last;
        self.bytes_sent_since_last += other.bytes_sent_since_last;
        self.bytes_received_since_last += other.bytes_received_since_last;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_resets_deltas() {
        let mut stats = ChannelStatistics::default();
        stats.record_sent(100);
        stats.record_sent(50);
        stats.record_received(30);
        stats.record_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 150);
        assert_eq!(snap.frames_sent_since_last, 2);
        assert_eq!(snap.frames_received_since_last, 1);
        assert_eq!(snap.frames_dropped_since_last, 1);

        // Deltas reset, cumulatives keep growing
        let again = stats.snapshot();
        assert_eq!(again.frames_sent, 2);
        assert_eq!(again.frames_sent_since_last, 0);
        assert_eq!(again.bytes_sent_since_last, 0);

        stats.record_sent(10);
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.frames_sent_since_last, 1);
    }
}
