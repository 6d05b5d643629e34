//! Bounded PCM buffer between device threads and the pipeline
//!
//! One producer and one consumer, on different threads. Writes beyond the
//! capacity drop the oldest data; reads never block and fill any
//! shortfall with silence.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Counters kept by the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PcmBufferStats {
    /// Write calls
    pub n_write: u32,

    /// Read calls
    pub n_read: u32,

    /// Writes that had to drop old data
    pub n_overflow: u32,

    /// Reads that came up short and were zero-filled
    pub n_underflow: u32,

    /// Bytes currently buffered
    pub fill: usize,
}

struct Inner {
    data: VecDeque<u8>,
    stats: PcmBufferStats,
}

/// Bounded FIFO of interleaved 16-bit PCM bytes
pub struct PcmBuffer {
    max_bytes: usize,
    inner: Mutex<Inner>,
}

impl PcmBuffer {
    /// Create a buffer holding at most `max_bytes`
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(Inner {
                data: VecDeque::with_capacity(max_bytes),
                stats: PcmBufferStats::default(),
            }),
        }
    }

    /// Append samples; oldest data is dropped once the capacity would be
    /// exceeded.
    pub fn write(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        inner.stats.n_write += 1;

        let overshoot = (inner.data.len() + bytes.len()).saturating_sub(self.max_bytes);
        if overshoot > 0 {
            inner.stats.n_overflow += 1;
            if overshoot >= inner.data.len() {
                inner.data.clear();
            } else {
                inner.data.drain(..overshoot);
            }
        }

        let tail = bytes.len().min(self.max_bytes);
        inner.data.extend(&bytes[bytes.len() - tail..]);
    }

    /// Fill `dst` from the front of the buffer; any shortfall becomes
    /// silence. Never blocks.
    pub fn read(&self, dst: &mut [u8]) {
        let mut inner = self.inner.lock();
        inner.stats.n_read += 1;

        let available = inner.data.len().min(dst.len());
        for b in dst.iter_mut().take(available) {
            *b = inner.data.pop_front().unwrap_or(0);
        }

        if available < dst.len() {
            inner.stats.n_underflow += 1;
            dst[available..].fill(0);
        }
    }

    /// Read exactly one frame, only when it is fully buffered.
    ///
    /// Returns `false` and leaves `dst` untouched when less than a frame
    /// is available.
    pub fn read_frame(&self, dst: &mut [u8]) -> bool {
        {
            let inner = self.inner.lock();
            if inner.data.len() < dst.len() {
                return false;
            }
        }
        self.read(dst);
        true
    }

    /// Bytes currently buffered
    pub fn fill(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> PcmBufferStats {
        let inner = self.inner.lock();
        PcmBufferStats {
            fill: inner.data.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let buf = PcmBuffer::new(1024);
        buf.write(&[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        buf.read(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(buf.fill(), 0);
    }

    #[test]
    fn test_short_read_zero_fills() {
        let buf = PcmBuffer::new(1024);
        buf.write(&[0x11, 0x22]);

        let mut out = [0xffu8; 6];
        buf.read(&mut out);
        assert_eq!(out, [0x11, 0x22, 0, 0, 0, 0]);
        assert_eq!(buf.stats().n_underflow, 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buf = PcmBuffer::new(4);
        buf.write(&[1, 2, 3, 4]);
        buf.write(&[5, 6]);

        let mut out = [0u8; 4];
        buf.read(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(buf.stats().n_overflow, 1);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let buf = PcmBuffer::new(4);
        buf.write(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut out = [0u8; 4];
        buf.read(&mut out);
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn test_read_frame_waits_for_full_frame() {
        let buf = PcmBuffer::new(1024);
        buf.write(&[1, 2]);

        let mut frame = [0u8; 4];
        assert!(!buf.read_frame(&mut frame));
        assert_eq!(buf.fill(), 2);

        buf.write(&[3, 4]);
        assert!(buf.read_frame(&mut frame));
        assert_eq!(frame, [1, 2, 3, 4]);
    }

    #[test]
    fn test_cross_thread_producer_consumer() {
        use std::sync::Arc;

        let buf = Arc::new(PcmBuffer::new(64 * 1024));
        let producer = Arc::clone(&buf);

        let handle = std::thread::spawn(move || {
            for chunk in 0..100u8 {
                producer.write(&[chunk; 320]);
            }
        });

        handle.join().unwrap();

        let mut total = 0usize;
        let mut out = [0u8; 320];
        while buf.fill() > 0 {
            buf.read(&mut out);
            total += out.len();
        }
        assert_eq!(total % 320, 0);
        assert!(total <= 100 * 320);
    }
}
