//! RTP and RTCP support for the softsip media engine.
//!
//! This crate provides the transport-level building blocks used by the
//! media pipelines:
//!
//! - [`packet`]: RFC 3550 RTP packet encoding and decoding
//! - [`rtcp`]: RTCP sender/receiver reports and payload-specific feedback
//!   (FIR and PLI keyframe requests)
//! - [`jbuf`]: a bounded jitter buffer reordering incoming packets by
//!   sequence number
//! - [`session`]: an RTP session owning the UDP socket pair, assigning
//!   sequence numbers and SSRC at send time, tracking loss and remote
//!   SSRC changes, and scheduling RTCP and keep-alive traffic

pub mod error;
pub mod jbuf;
pub mod packet;
pub mod rtcp;
pub mod session;

pub use error::Error;
pub use jbuf::{JitterBuffer, JitterBufferConfig, JitterStats};
pub use packet::{RtpHeader, RtpPacket};
pub use session::{RtpSession, RtpSessionConfig, RtpStats};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// RTP synchronization source identifier
pub type RtpSsrc = u32;

/// RTP sequence number
pub type RtpSequence = u16;

/// RTP timestamp
pub type RtpTimestamp = u32;

/// RTP protocol version (always 2)
pub const RTP_VERSION: u8 = 2;

/// Minimum size of an RTP header in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// First dynamic payload type (RFC 3551)
pub const PT_DYNAMIC_MIN: u8 = 96;

/// Last dynamic payload type
pub const PT_DYNAMIC_MAX: u8 = 127;

/// Static payload type for Comfort Noise (RFC 3389)
pub const PT_COMFORT_NOISE: u8 = 13;

/// Compare two 16-bit sequence numbers with wrap-around.
///
/// `a` is considered older than `b` when the forward distance from `a`
/// to `b` is in `(0, 2^15)`.
#[inline]
pub fn seq_less(a: RtpSequence, b: RtpSequence) -> bool {
    let d = b.wrapping_sub(a);
    d != 0 && d < 0x8000
}
