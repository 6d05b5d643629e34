//! Payload-specific RTCP feedback: PLI (RFC 4585) and FIR (RFC 5104)
//!
//! Both ask the remote sender for a full intra frame. PLI is preferred when
//! the peer advertised `a=rtcp-fb:* nack pli`; FIR is the fallback.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// PSFB feedback message type for Picture Loss Indication
pub const PSFB_FMT_PLI: u8 = 1;

/// PSFB feedback message type for Full Intra Request
pub const PSFB_FMT_FIR: u8 = 4;

/// Picture Loss Indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpPli {
    /// SSRC of the sender of this message
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source the loss was observed on
    pub media_ssrc: RtpSsrc,
}

impl RtcpPli {
    /// Create a PLI for a media source
    pub fn new(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
        }
    }

    /// Serialize the feedback body (without the RTCP header)
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf
    }

    /// Parse the feedback body
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(Error::BufferTooSmall {
                required: 8,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

/// Full Intra Request with one FCI entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpFir {
    /// SSRC of the sender of this message
    pub sender_ssrc: RtpSsrc,

    /// SSRC the request is directed at
    pub media_ssrc: RtpSsrc,

    /// Command sequence number, incremented per request
    pub seq: u8,
}

impl RtcpFir {
    /// Create a FIR directed at a media source
    pub fn new(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc, seq: u8) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            seq,
        }
    }

    /// Serialize the feedback body (without the RTCP header)
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32(self.sender_ssrc);
        // media SSRC of the FB message itself is unused for FIR
        buf.put_u32(0);
        // FCI entry
        buf.put_u32(self.media_ssrc);
        buf.put_u8(self.seq);
        buf.put_u8(0);
        buf.put_u16(0);
        buf
    }

    /// Parse the feedback body, reading the first FCI entry
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 16 {
            return Err(Error::BufferTooSmall {
                required: 16,
                available: buf.remaining(),
            });
        }

        let sender_ssrc = buf.get_u32();
        let _fb_media_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let seq = buf.get_u8();
        buf.advance(3); // reserved

        Ok(Self {
            sender_ssrc,
            media_ssrc,
            seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pli_roundtrip() {
        let pli = RtcpPli::new(0x1111, 0x2222);
        let wire = pli.serialize();
        assert_eq!(wire.len(), 8);
        assert_eq!(RtcpPli::parse(&mut wire.freeze()).unwrap(), pli);
    }

    #[test]
    fn test_fir_roundtrip() {
        let fir = RtcpFir::new(0x3333, 0x4444, 9);
        let wire = fir.serialize();
        assert_eq!(wire.len(), 16);
        assert_eq!(RtcpFir::parse(&mut wire.freeze()).unwrap(), fir);
    }
}
