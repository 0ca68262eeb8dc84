//! Low-throughput guard
//!
//! Aborts an attempt when sustained bytes/second stay under the source
//! kind's floor for longer than its evaluation window. Timeouts bound the
//! worst-case stall; they are ordinary transient failures, not fatal.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct SpeedGuard {
    floor_bps: u64,
    window: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl SpeedGuard {
    pub(crate) fn new(floor_bps: u64, window: Duration, now: Instant) -> Self {
        Self {
            floor_bps,
            window,
            window_start: now,
            window_bytes: 0,
        }
    }

    /// Record received bytes; returns the measured rate when a full window
    /// elapsed under the floor, `None` while healthy.
    pub(crate) fn record(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.window_bytes = self.window_bytes.saturating_add(bytes);

        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let rate = self.window_bytes / elapsed.as_secs().max(1);
        if rate < self.floor_bps {
            return Some(rate);
        }

        // Healthy window; start measuring the next one
        self.window_start = now;
        self.window_bytes = 0;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_stream_passes() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);

        // 2000 B/s sustained over the window
        assert_eq!(guard.record(20_000, start + Duration::from_secs(10)), None);
        // Next window is also healthy
        assert_eq!(guard.record(25_000, start + Duration::from_secs(20)), None);
    }

    #[test]
    fn stalled_stream_trips_after_window() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);

        // Within the window nothing trips, however slow
        assert_eq!(guard.record(5, start + Duration::from_secs(9)), None);
        // Window elapsed at 1 B/s: tripped
        let rate = guard.record(5, start + Duration::from_secs(10));
        assert!(rate.is_some());
        assert!(rate.unwrap() < 1000);
    }

    #[test]
    fn rate_resets_per_window() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);

        assert_eq!(guard.record(100_000, start + Duration::from_secs(10)), None);
        // A fast first window does not excuse a dead second window
        assert!(guard
            .record(0, start + Duration::from_secs(20))
            .is_some());
    }
}
