//! Transport statistics with periodic bitrate sampling

use std::time::Instant;

use parking_lot::Mutex;

/// Snapshot of an RTP session's transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpStats {
    /// Packets transmitted
    pub tx_packets: u32,

    /// Packets received
    pub rx_packets: u32,

    /// Bytes transmitted
    pub tx_bytes: u64,

    /// Bytes received
    pub rx_bytes: u64,

    /// Transmit bitrate over the last sample window, bits per second
    pub bitrate_tx: u64,

    /// Receive bitrate over the last sample window, bits per second
    pub bitrate_rx: u64,
}

#[derive(Default)]
struct Window {
    tx_bytes: u64,
    rx_bytes: u64,
    since: Option<Instant>,
}

/// Shared counter state updated from send/receive paths
#[derive(Default)]
pub(super) struct StatsInner {
    stats: Mutex<RtpStats>,
    window: Mutex<Window>,
}

impl StatsInner {
    pub(super) fn count_tx(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.tx_packets += 1;
        stats.tx_bytes += bytes as u64;
        self.window.lock().tx_bytes += bytes as u64;
    }

    pub(super) fn count_rx(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.rx_packets += 1;
        stats.rx_bytes += bytes as u64;
        self.window.lock().rx_bytes += bytes as u64;
    }

    /// Fold the current window into the bitrate fields and reset it
    pub(super) fn sample_bitrates(&self) {
        let mut window = self.window.lock();
        let now = Instant::now();

        if let Some(since) = window.since {
            let elapsed_ms = now.duration_since(since).as_millis() as u64;
            if elapsed_ms > 0 {
                let mut stats = self.stats.lock();
                stats.bitrate_tx = 1000 * 8 * window.tx_bytes / elapsed_ms;
                stats.bitrate_rx = 1000 * 8 * window.rx_bytes / elapsed_ms;
            }
        }

        window.tx_bytes = 0;
        window.rx_bytes = 0;
        window.since = Some(now);
    }

    pub(super) fn snapshot(&self) -> RtpStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_counters_accumulate() {
        let inner = StatsInner::default();
        inner.count_tx(100);
        inner.count_tx(50);
        inner.count_rx(200);

        let s = inner.snapshot();
        assert_eq!(s.tx_packets, 2);
        assert_eq!(s.tx_bytes, 150);
        assert_eq!(s.rx_packets, 1);
        assert_eq!(s.rx_bytes, 200);
    }

    #[test]
    fn test_bitrate_sampled_over_window() {
        let inner = StatsInner::default();
        inner.sample_bitrates(); // establish window start

        inner.count_tx(1000);
        std::thread::sleep(Duration::from_millis(50));
        inner.sample_bitrates();

        let s = inner.snapshot();
        assert!(s.bitrate_tx > 0);

        // a fresh window with no traffic reports zero
        std::thread::sleep(Duration::from_millis(20));
        inner.sample_bitrates();
        assert_eq!(inner.snapshot().bitrate_tx, 0);
    }
}
