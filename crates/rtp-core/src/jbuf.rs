//! Jitter buffer for incoming RTP
//!
//! Reorders received packets by sequence number before they reach the
//! decoder. Depth is bounded in packets; the buffer accumulates until the
//! minimum depth is reached once, after which it drains even below the
//! minimum (steady state).

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::packet::RtpHeader;
use crate::{seq_less, Error, Result};

/// Jitter buffer depth bounds, in packets
#[derive(Debug, Clone, Copy)]
pub struct JitterBufferConfig {
    /// Minimum depth before packets are handed out
    pub min_depth: usize,

    /// Maximum depth; beyond this `put` discards the oldest packet
    pub max_depth: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            min_depth: 2,
            max_depth: 10,
        }
    }
}

impl JitterBufferConfig {
    /// Convert configured buffering delays in milliseconds into packet
    /// depths, given the negotiated packet time.
    pub fn from_ms(min_ms: u32, max_ms: u32, ptime_ms: u32) -> Self {
        let ptime = ptime_ms.max(1);
        Self {
            min_depth: (min_ms / ptime).max(1) as usize,
            max_depth: ((max_ms + ptime - 1) / ptime).max(2) as usize,
        }
    }
}

/// Counters kept by the jitter buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    /// Packets inserted
    pub n_put: u32,

    /// Packets handed out
    pub n_get: u32,

    /// Packets rejected because the buffer was full
    pub n_overflow: u32,

    /// Packets rejected because they arrived too late
    pub n_underflow: u32,
}

struct Entry {
    header: RtpHeader,
    payload: Bytes,
}

/// Ordered, bounded reassembly buffer keyed by RTP sequence number
pub struct JitterBuffer {
    config: JitterBufferConfig,
    // ordered by sequence, oldest first
    entries: VecDeque<Entry>,
    // set once min_depth was reached; cleared by flush
    running: bool,
    // sequence of the last packet handed out, if any
    last_out: Option<u16>,
    stats: JitterStats,
}

impl JitterBuffer {
    /// Create a jitter buffer with the given depth bounds
    pub fn new(config: JitterBufferConfig) -> Self {
        Self {
            config,
            entries: VecDeque::with_capacity(config.max_depth),
            running: false,
            last_out: None,
            stats: JitterStats::default(),
        }
    }

    /// Insert a received packet at its sequence position.
    ///
    /// At maximum depth the oldest held packet is discarded (counted as
    /// overflow) so the fresh one is admitted. Fails with
    /// [`Error::JitterLate`] when the packet is older than the newest
    /// frame already handed out.
    pub fn put(&mut self, header: RtpHeader, payload: Bytes) -> Result<()> {
        let seq = header.sequence;
        self.stats.n_put += 1;

        // Arrived after its playout position was passed?
        if let Some(last) = self.last_out {
            if !seq_less(last, seq) {
                self.stats.n_underflow += 1;
                debug!(seq, last, "late packet dropped");
                return Err(Error::JitterLate);
            }
        }

        // Find the insert position scanning back from the tail; in-order
        // arrival hits the first comparison.
        let mut pos = self.entries.len();
        while pos > 0 {
            let prev = self.entries[pos - 1].header.sequence;
            if prev == seq {
                self.stats.n_underflow += 1;
                return Err(Error::JitterDuplicate);
            }
            if seq_less(prev, seq) {
                break;
            }
            pos -= 1;
        }

        // Full: the oldest packet makes way for the fresh one
        while self.entries.len() >= self.config.max_depth.max(1) {
            self.entries.pop_front();
            self.stats.n_overflow += 1;
            if pos > 0 {
                pos -= 1;
            }
            debug!(seq, "jitter buffer full, oldest packet discarded");
        }

        self.entries.insert(pos, Entry { header, payload });

        if self.entries.len() >= self.config.min_depth {
            self.running = true;
        }

        Ok(())
    }

    /// Take the oldest packet, if the buffer is ready to hand one out
    pub fn get(&mut self) -> Option<(RtpHeader, Bytes)> {
        if !self.running {
            return None;
        }

        let entry = self.entries.pop_front()?;
        self.stats.n_get += 1;
        self.last_out = Some(entry.header.sequence);

        Some((entry.header, entry.payload))
    }

    /// Discard all held packets and restart accumulation
    pub fn flush(&mut self) {
        self.entries.clear();
        self.running = false;
        self.last_out = None;
    }

    /// Number of packets currently held
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Current counters
    pub fn stats(&self) -> JitterStats {
        self.stats
    }
}
