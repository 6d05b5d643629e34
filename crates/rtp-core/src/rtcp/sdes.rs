//! RTCP Source Description (RFC 3550 §6.5)
//!
//! Only the CNAME item is produced; unknown items are skipped on parse.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

const SDES_ITEM_END: u8 = 0;
const SDES_ITEM_CNAME: u8 = 1;

/// A single-chunk source description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdes {
    /// SSRC the description is about
    pub ssrc: RtpSsrc,

    /// Canonical endpoint name
    pub cname: String,
}

impl RtcpSdes {
    /// Create a CNAME description for a source
    pub fn cname(ssrc: RtpSsrc, cname: &str) -> Self {
        Self {
            ssrc,
            cname: cname.to_string(),
        }
    }

    /// Serialize the chunk body (without the RTCP header)
    pub fn serialize(&self) -> BytesMut {
        let name = self.cname.as_bytes();
        let len = name.len().min(255);

        let mut buf = BytesMut::with_capacity(4 + 2 + len + 4);
        buf.put_u32(self.ssrc);
        buf.put_u8(SDES_ITEM_CNAME);
        buf.put_u8(len as u8);
        buf.extend_from_slice(&name[..len]);
        buf.put_u8(SDES_ITEM_END);

        buf
    }

    /// Parse the first chunk of an SDES body
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let mut cname = String::new();

        while buf.remaining() >= 1 {
            let item = buf.get_u8();
            if item == SDES_ITEM_END {
                break;
            }
            if buf.remaining() < 1 {
                return Err(Error::RtcpError("truncated SDES item".into()));
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(Error::RtcpError("truncated SDES item".into()));
            }

            let mut value = vec![0u8; len];
            buf.copy_to_slice(&mut value);

            if item == SDES_ITEM_CNAME {
                cname = String::from_utf8_lossy(&value).into_owned();
            }
        }

        Ok(Self { ssrc, cname })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cname_roundtrip() {
        let sdes = RtcpSdes::cname(0xdead_beef, "bob@10.0.0.2");
        let wire = sdes.serialize();
        let parsed = RtcpSdes::parse(&mut wire.freeze()).unwrap();
        assert_eq!(parsed, sdes);
    }

    #[test]
    fn test_unknown_item_skipped() {
        let mut buf = BytesMut::new();
        buf.put_u32(7);
        buf.put_u8(8); // PRIV, not produced by us
        buf.put_u8(2);
        buf.extend_from_slice(b"xy");
        buf.put_u8(SDES_ITEM_CNAME);
        buf.put_u8(1);
        buf.extend_from_slice(b"a");
        buf.put_u8(SDES_ITEM_END);

        let parsed = RtcpSdes::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed.ssrc, 7);
        assert_eq!(parsed.cname, "a");
    }
}
