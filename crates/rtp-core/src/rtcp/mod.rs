//! RTCP packet encoding and decoding
//!
//! Covers the subset of RFC 3550 / RFC 4585 / RFC 5104 used by the media
//! engine: sender and receiver reports, source description (CNAME), BYE,
//! and payload-specific feedback (PLI and FIR) for keyframe requests.

pub mod feedback;
pub mod ntp;
pub mod reports;
pub mod sdes;

pub use feedback::{RtcpFir, RtcpPli, PSFB_FMT_FIR, PSFB_FMT_PLI};
pub use ntp::NtpTimestamp;
pub use reports::{RtcpReceiverReport, RtcpReportBlock, RtcpSenderReport};
pub use sdes::RtcpSdes;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc, RTP_VERSION};

/// RTCP packet types (RFC 3550 §6, RFC 4585 §6.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Sender Report (SR)
    SenderReport = 200,

    /// Receiver Report (RR)
    ReceiverReport = 201,

    /// Source Description (SDES)
    SourceDescription = 202,

    /// Goodbye (BYE)
    Goodbye = 203,

    /// Payload-specific feedback (PSFB); carries PLI and FIR
    PayloadFeedback = 206,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            206 => Ok(RtcpPacketType::PayloadFeedback),
            _ => Err(Error::RtcpError(format!(
                "Unknown RTCP packet type: {}",
                value
            ))),
        }
    }
}

/// One packet out of an RTCP compound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// Sender report
    SenderReport(RtcpSenderReport),

    /// Receiver report
    ReceiverReport(RtcpReceiverReport),

    /// Source description
    SourceDescription(RtcpSdes),

    /// Goodbye with the leaving SSRCs
    Goodbye(Vec<RtpSsrc>),

    /// Picture Loss Indication
    PictureLossIndication(RtcpPli),

    /// Full Intra Request
    FullIntraRequest(RtcpFir),
}

impl RtcpPacket {
    /// Serialize this packet, including its 4-byte RTCP header
    pub fn serialize(&self) -> Result<BytesMut> {
        let (pt, count, body) = match self {
            RtcpPacket::SenderReport(sr) => (
                RtcpPacketType::SenderReport,
                sr.report_blocks.len() as u8,
                sr.serialize(),
            ),
            RtcpPacket::ReceiverReport(rr) => (
                RtcpPacketType::ReceiverReport,
                rr.report_blocks.len() as u8,
                rr.serialize(),
            ),
            RtcpPacket::SourceDescription(sdes) => (
                RtcpPacketType::SourceDescription,
                1, // one chunk
                sdes.serialize(),
            ),
            RtcpPacket::Goodbye(ssrcs) => {
                let mut body = BytesMut::with_capacity(4 * ssrcs.len());
                for ssrc in ssrcs {
                    body.put_u32(*ssrc);
                }
                (RtcpPacketType::Goodbye, ssrcs.len() as u8, body)
            }
            RtcpPacket::PictureLossIndication(pli) => {
                (RtcpPacketType::PayloadFeedback, PSFB_FMT_PLI, pli.serialize())
            }
            RtcpPacket::FullIntraRequest(fir) => {
                (RtcpPacketType::PayloadFeedback, PSFB_FMT_FIR, fir.serialize())
            }
        };

        // Body must be padded to a 32-bit boundary
        let mut body = body;
        while body.len() % 4 != 0 {
            body.put_u8(0);
        }

        let length_words = (body.len() / 4) as u16;
        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u8((RTP_VERSION << 6) | (count & 0x1f));
        buf.put_u8(pt as u8);
        buf.put_u16(length_words);
        buf.extend_from_slice(&body);

        Ok(buf)
    }

    /// Parse one RTCP packet from the front of `buf`, advancing past it
    pub fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(Error::RtcpError(format!(
                "unsupported RTCP version: {}",
                version
            )));
        }
        let count = b0 & 0x1f;
        let pt = RtcpPacketType::try_from(buf.get_u8())?;
        let length_words = buf.get_u16() as usize;
        let body_len = length_words * 4;

        if buf.remaining() < body_len {
            return Err(Error::BufferTooSmall {
                required: body_len,
                available: buf.remaining(),
            });
        }

        let mut body = buf.split_to(body_len);

        match pt {
            RtcpPacketType::SenderReport => Ok(RtcpPacket::SenderReport(
                RtcpSenderReport::parse(&mut body, count)?,
            )),
            RtcpPacketType::ReceiverReport => Ok(RtcpPacket::ReceiverReport(
                RtcpReceiverReport::parse(&mut body, count)?,
            )),
            RtcpPacketType::SourceDescription => {
                Ok(RtcpPacket::SourceDescription(RtcpSdes::parse(&mut body)?))
            }
            RtcpPacketType::Goodbye => {
                let mut ssrcs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    if body.remaining() < 4 {
                        return Err(Error::RtcpError("truncated BYE".into()));
                    }
                    ssrcs.push(body.get_u32());
                }
                Ok(RtcpPacket::Goodbye(ssrcs))
            }
            RtcpPacketType::PayloadFeedback => match count {
                PSFB_FMT_PLI => Ok(RtcpPacket::PictureLossIndication(RtcpPli::parse(
                    &mut body,
                )?)),
                PSFB_FMT_FIR => Ok(RtcpPacket::FullIntraRequest(RtcpFir::parse(&mut body)?)),
                fmt => Err(Error::RtcpError(format!("unsupported PSFB format: {}", fmt))),
            },
        }
    }
}

/// Parse a compound RTCP datagram into its individual packets.
///
/// Packets with unknown types are skipped rather than failing the whole
/// compound.
pub fn parse_compound(data: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut buf = Bytes::copy_from_slice(data);
    let mut packets = Vec::new();

    while buf.remaining() >= 4 {
        // Peek the length so each packet can be framed before parsing;
        // an unknown packet type then only loses its own frame
        let length_words = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let total = 4 + length_words * 4;
        if buf.remaining() < total {
            return Err(Error::RtcpError("truncated compound packet".into()));
        }

        let mut frame = buf.split_to(total);
        match RtcpPacket::parse(&mut frame) {
            Ok(packet) => packets.push(packet),
            Err(Error::RtcpError(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(packets)
}

/// Serialize packets into one compound datagram
pub fn serialize_compound(packets: &[RtcpPacket]) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    for packet in packets {
        buf.extend_from_slice(&packet.serialize()?);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_roundtrip() {
        let mut sr = RtcpSenderReport::new(0x1111_2222);
        sr.rtp_timestamp = 48_000;
        sr.sender_packet_count = 250;
        sr.sender_octet_count = 40_000;

        let sdes = RtcpSdes::cname(0x1111_2222, "alice@host");

        let compound = serialize_compound(&[
            RtcpPacket::SenderReport(sr.clone()),
            RtcpPacket::SourceDescription(sdes.clone()),
        ])
        .unwrap();

        let parsed = parse_compound(&compound).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], RtcpPacket::SenderReport(sr));
        assert_eq!(parsed[1], RtcpPacket::SourceDescription(sdes));
    }

    #[test]
    fn test_goodbye_roundtrip() {
        let bye = RtcpPacket::Goodbye(vec![0xaaaa, 0xbbbb]);
        let wire = bye.serialize().unwrap();
        let mut bytes = wire.freeze();
        let parsed = RtcpPacket::parse(&mut bytes).unwrap();
        assert_eq!(parsed, RtcpPacket::Goodbye(vec![0xaaaa, 0xbbbb]));
    }

    #[test]
    fn test_reject_bad_version() {
        let data = [0x40u8, 200, 0, 0];
        let mut bytes = Bytes::copy_from_slice(&data);
        assert!(RtcpPacket::parse(&mut bytes).is_err());
    }
}
