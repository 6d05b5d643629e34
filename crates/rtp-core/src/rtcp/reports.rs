//! RTCP sender and receiver reports (RFC 3550 §6.4)

use bytes::{Buf, BufMut, BytesMut};

use super::ntp::NtpTimestamp;
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// Report block carried in SR/RR packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReportBlock {
    /// SSRC of the source this report is about
    pub ssrc: RtpSsrc,

    /// Fraction of packets lost since the previous report (8-bit fixed point)
    pub fraction_lost: u8,

    /// Cumulative number of packets lost (24 bits)
    pub cumulative_lost: u32,

    /// Extended highest sequence number received
    pub highest_seq: u32,

    /// Interarrival jitter estimate in timestamp units
    pub jitter: u32,

    /// Middle 32 bits of the last SR's NTP timestamp
    pub last_sr: u32,

    /// Delay since the last SR, in units of 1/65536 seconds
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    /// Size of a report block in bytes
    pub const SIZE: usize = 24;

    /// Create an empty report block for a source
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            fraction_lost: 0,
            cumulative_lost: 0,
            highest_seq: 0,
            jitter: 0,
            last_sr: 0,
            delay_since_last_sr: 0,
        }
    }

    /// Parse a report block
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();

        // fraction lost (8 bits) + cumulative lost (24 bits)
        let fraction_lost = buf.get_u8();
        let cumulative_lost =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32;

        Ok(Self {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    /// Serialize a report block
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);

        buf.put_u32(self.ssrc);

        buf.put_u8(self.fraction_lost);
        buf.put_u8(((self.cumulative_lost >> 16) & 0xff) as u8);
        buf.put_u8(((self.cumulative_lost >> 8) & 0xff) as u8);
        buf.put_u8((self.cumulative_lost & 0xff) as u8);

        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}

/// RTCP Sender Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    /// SSRC of the sender
    pub ssrc: RtpSsrc,

    /// NTP timestamp of this report
    pub ntp_timestamp: NtpTimestamp,

    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: u32,

    /// Sender's packet count
    pub sender_packet_count: u32,

    /// Sender's octet count
    pub sender_octet_count: u32,

    /// Report blocks about received sources
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpSenderReport {
    /// Create a sender report stamped with the current time
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            ntp_timestamp: NtpTimestamp::now(),
            rtp_timestamp: 0,
            sender_packet_count: 0,
            sender_octet_count: 0,
            report_blocks: Vec::new(),
        }
    }

    /// Serialize the report body (without the RTCP header)
    pub fn serialize(&self) -> BytesMut {
        let mut buf =
            BytesMut::with_capacity(24 + self.report_blocks.len() * RtcpReportBlock::SIZE);

        buf.put_u32(self.ssrc);
        buf.put_u32(self.ntp_timestamp.seconds);
        buf.put_u32(self.ntp_timestamp.fraction);
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.sender_packet_count);
        buf.put_u32(self.sender_octet_count);

        for block in &self.report_blocks {
            block.serialize(&mut buf);
        }

        buf
    }

    /// Parse a sender report body; `report_count` comes from the header
    pub fn parse(buf: &mut impl Buf, report_count: u8) -> Result<Self> {
        if buf.remaining() < 24 {
            return Err(Error::BufferTooSmall {
                required: 24,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let ntp_timestamp = NtpTimestamp {
            seconds: buf.get_u32(),
            fraction: buf.get_u32(),
        };
        let rtp_timestamp = buf.get_u32();
        let sender_packet_count = buf.get_u32();
        let sender_octet_count = buf.get_u32();

        let mut report_blocks = Vec::with_capacity(report_count as usize);
        for _ in 0..report_count {
            report_blocks.push(RtcpReportBlock::parse(buf)?);
        }

        Ok(Self {
            ssrc,
            ntp_timestamp,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            report_blocks,
        })
    }
}

/// RTCP Receiver Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// SSRC of this receiver
    pub ssrc: RtpSsrc,

    /// Report blocks about received sources
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// Create an empty receiver report
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            report_blocks: Vec::new(),
        }
    }

    /// Serialize the report body (without the RTCP header)
    pub fn serialize(&self) -> BytesMut {
        let mut buf =
            BytesMut::with_capacity(4 + self.report_blocks.len() * RtcpReportBlock::SIZE);

        buf.put_u32(self.ssrc);
        for block in &self.report_blocks {
            block.serialize(&mut buf);
        }

        buf
    }

    /// Parse a receiver report body; `report_count` comes from the header
    pub fn parse(buf: &mut impl Buf, report_count: u8) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let mut report_blocks = Vec::with_capacity(report_count as usize);
        for _ in 0..report_count {
            report_blocks.push(RtcpReportBlock::parse(buf)?);
        }

        Ok(Self {
            ssrc,
            report_blocks,
        })
    }
}
