//! Generic media stream
//!
//! Couples one RTP session with a jitter buffer and the negotiated
//! direction. Both the audio and video pipelines sit on top of one of
//! these: transmit is gated on the local direction carrying send,
//! receive packets are reordered through the jitter buffer and drained
//! to the owner after every insert, and an SSRC change flushes the
//! buffer before the new source's packets enter it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use softsip_rtp_core::jbuf::{JitterBuffer, JitterBufferConfig, JitterStats};
use softsip_rtp_core::packet::RtpHeader;
use softsip_rtp_core::session::{FeedbackEvent, RtpSession};
use softsip_sdp_core::MediaDirection;

use crate::Result;

/// Handler invoked with each in-order received packet
pub type StreamRecvHandler = Box<dyn Fn(RtpHeader, Bytes) + Send + Sync>;

/// A media stream: RTP session + jitter buffer + direction state
pub struct MediaStream {
    name: &'static str,
    session: Arc<RtpSession>,
    jbuf: Mutex<JitterBuffer>,
    direction: Mutex<MediaDirection>,
    active: AtomicBool,
}

impl MediaStream {
    /// Create a stream over a bound RTP session
    pub fn new(
        name: &'static str,
        session: Arc<RtpSession>,
        jbuf_config: JitterBufferConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            session,
            jbuf: Mutex::new(JitterBuffer::new(jbuf_config)),
            direction: Mutex::new(MediaDirection::SendRecv),
            active: AtomicBool::new(false),
        })
    }

    /// The underlying RTP session
    pub fn session(&self) -> &Arc<RtpSession> {
        &self.session
    }

    /// Stream name for logs ("audio" / "video")
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Install the receive handler: packets arrive in sequence order,
    /// after jitter buffering and SSRC handling.
    pub fn set_recv_handler<F>(self: &Arc<Self>, handler: F)
    where
        F: Fn(RtpHeader, Bytes) + Send + Sync + 'static,
    {
        let stream = Arc::clone(self);
        let handler: StreamRecvHandler = Box::new(handler);

        self.session
            .set_rtp_handler(move |_source, header, payload, meta| {
                if !stream.active.load(Ordering::Relaxed) {
                    return;
                }
                if !stream.direction.lock().can_recv() {
                    return;
                }

                let mut jbuf = stream.jbuf.lock();

                if meta.ssrc_changed {
                    info!(stream = stream.name, "SSRC changed, flushing jitter buffer");
                    jbuf.flush();
                }

                if let Err(e) = jbuf.put(header, payload) {
                    debug!(stream = stream.name, "jitter buffer rejected packet: {}", e);
                }

                // drain everything that is in order now
                while let Some((header, payload)) = jbuf.get() {
                    handler(header, payload);
                }
            });
    }

    /// Send one packet when active and the local direction allows it
    pub fn send(&self, marker: bool, payload_type: u8, timestamp: u32, payload: &[u8]) -> Result<()> {
        if !self.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        if !self.direction.lock().can_send() {
            return Ok(());
        }

        self.session.send(marker, payload_type, timestamp, payload)?;
        Ok(())
    }

    /// Install the keyframe-request feedback handler (video streams)
    pub fn set_feedback_handler<F>(&self, handler: F)
    where
        F: Fn(FeedbackEvent) + Send + Sync + 'static,
    {
        self.session.set_feedback_handler(handler);
    }

    /// Mark the stream active and start its transport loops
    pub fn start(self: &Arc<Self>) {
        self.session.start();
        self.active.store(true, Ordering::Relaxed);
    }

    /// Mark the stream inactive; packets are neither sent nor delivered.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Whether the stream is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Update the negotiated local direction
    pub fn set_direction(&self, direction: MediaDirection) {
        *self.direction.lock() = direction;
    }

    /// The current local direction
    pub fn direction(&self) -> MediaDirection {
        *self.direction.lock()
    }

    /// Hold maps to sendonly, resume back to sendrecv
    pub fn hold(&self, hold: bool) {
        self.set_direction(if hold {
            MediaDirection::SendOnly
        } else {
            MediaDirection::SendRecv
        });
    }

    /// Discard all buffered receive packets
    pub fn flush(&self) {
        self.jbuf.lock().flush();
    }

    /// Jitter buffer counters
    pub fn jitter_stats(&self) -> JitterStats {
        self.jbuf.lock().stats()
    }

    /// Ask the peer for a keyframe (PLI or FIR per negotiation)
    pub fn request_keyframe(&self) -> Result<()> {
        self.session.request_keyframe()?;
        Ok(())
    }
}
