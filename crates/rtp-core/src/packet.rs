//! RTP packet encoding and decoding (RFC 3550)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSequence, RtpSsrc, RtpTimestamp, RTP_HEADER_SIZE, RTP_VERSION};

/// Parsed view of an RTP packet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (always 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// Marker bit
    pub marker: bool,

    /// Payload type (0-127)
    pub payload_type: u8,

    /// Sequence number
    pub sequence: RtpSequence,

    /// RTP timestamp in media clock units
    pub timestamp: RtpTimestamp,

    /// Synchronization source
    pub ssrc: RtpSsrc,

    /// Contributing sources (0-15 entries)
    pub csrc: Vec<RtpSsrc>,
}

impl RtpHeader {
    /// Create a header with the given payload type, sequence, timestamp and SSRC
    pub fn new(
        payload_type: u8,
        sequence: RtpSequence,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Serialized size of this header in bytes
    pub fn size(&self) -> usize {
        RTP_HEADER_SIZE + 4 * self.csrc.len()
    }

    /// Parse an RTP header from a buffer
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!(
                "unsupported RTP version: {}",
                version
            )));
        }

        let padding = (b0 & 0x20) != 0;
        let extension = (b0 & 0x10) != 0;
        let cc = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let marker = (b1 & 0x80) != 0;
        let payload_type = b1 & 0x7f;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < 4 * cc {
            return Err(Error::BufferTooSmall {
                required: 4 * cc,
                available: buf.remaining(),
            });
        }

        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        // Skip a header extension if present
        if extension {
            if buf.remaining() < 4 {
                return Err(Error::InvalidPacket("truncated header extension".into()));
            }
            buf.get_u16(); // profile-defined id
            let words = buf.get_u16() as usize;
            if buf.remaining() < 4 * words {
                return Err(Error::InvalidPacket("truncated header extension".into()));
            }
            buf.advance(4 * words);
        }

        Ok(Self {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc,
        })
    }

    /// Serialize this header into a buffer
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());

        let mut b0 = (RTP_VERSION << 6) | (self.csrc.len() as u8 & 0x0f);
        if self.padding {
            b0 |= 0x20;
        }
        buf.put_u8(b0);

        let mut b1 = self.payload_type & 0x7f;
        if self.marker {
            b1 |= 0x80;
        }
        buf.put_u8(b1);

        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
    }
}

/// A complete RTP packet: parsed header plus payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// The packet header
    pub header: RtpHeader,

    /// The payload following the header
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet from a header and payload
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a datagram into header and payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let header = RtpHeader::parse(&mut buf)?;

        // Strip padding octets if flagged
        let mut payload = Bytes::copy_from_slice(buf);
        if header.padding && !payload.is_empty() {
            let pad = payload[payload.len() - 1] as usize;
            if pad == 0 || pad > payload.len() {
                return Err(Error::InvalidPacket("bad padding length".into()));
            }
            payload.truncate(payload.len() - pad);
        }

        Ok(Self { header, payload })
    }

    /// Serialize the full packet to a new buffer
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.header.size() + self.payload.len());
        self.header.serialize(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut hdr = RtpHeader::new(96, 1000, 160_000, 0xdead_beef);
        hdr.marker = true;

        let mut buf = BytesMut::new();
        hdr.serialize(&mut buf);
        assert_eq!(buf.len(), RTP_HEADER_SIZE);

        let parsed = RtpHeader::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn test_packet_roundtrip() {
        let hdr = RtpHeader::new(0, 42, 8000, 0x1234_5678);
        let packet = RtpPacket::new(hdr, Bytes::from_static(&[0x55; 160]));

        let wire = packet.serialize().freeze();
        let parsed = RtpPacket::parse(&wire).unwrap();

        assert_eq!(parsed.header.payload_type, 0);
        assert_eq!(parsed.header.sequence, 42);
        assert_eq!(parsed.payload.len(), 160);
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_reject_bad_version() {
        let mut data = vec![0u8; RTP_HEADER_SIZE];
        data[0] = 0x40; // version 1
        assert!(RtpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_reject_truncated() {
        let data = [0x80u8, 0x00, 0x00];
        assert!(matches!(
            RtpPacket::parse(&data),
            Err(Error::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_padding_stripped() {
        let mut hdr = RtpHeader::new(8, 7, 0, 1);
        hdr.padding = true;
        let mut buf = BytesMut::new();
        hdr.serialize(&mut buf);
        // 3 payload bytes followed by 3 padding octets (last = count)
        buf.extend_from_slice(&[1, 2, 3, 0, 0, 3]);

        let parsed = RtpPacket::parse(&buf).unwrap();
        assert_eq!(&parsed.payload[..], &[1, 2, 3]);
    }

    #[test]
    fn test_csrc_list() {
        let mut hdr = RtpHeader::new(9, 1, 2, 3);
        hdr.csrc = vec![10, 20, 30];

        let mut buf = BytesMut::new();
        hdr.serialize(&mut buf);
        assert_eq!(buf.len(), RTP_HEADER_SIZE + 12);

        let parsed = RtpHeader::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed.csrc, vec![10, 20, 30]);
    }
}
