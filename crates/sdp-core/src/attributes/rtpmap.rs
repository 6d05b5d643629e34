//! `rtpmap` and `fmtp` attributes (RFC 8866 §6.6 / §6.15)

use std::fmt;

use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::u32 as nom_u32,
    combinator::opt,
    sequence::preceded,
    IResult,
};
use serde::{Deserialize, Serialize};

use super::to_result;
use crate::error::Error;
use crate::Result;

/// One negotiable RTP format of a media line: the union of its payload
/// type, `rtpmap` entry and optional `fmtp` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpFormat {
    /// RTP payload type
    pub payload_type: u8,

    /// Encoding name as it appears in `rtpmap` (case-preserved)
    pub name: String,

    /// RTP clock rate in Hz
    pub clock_rate: u32,

    /// Channel count; 1 when the rtpmap omits it
    pub channels: u8,

    /// Codec-specific `fmtp` parameters
    pub fmtp: Option<String>,
}

impl SdpFormat {
    /// Create a format without fmtp parameters
    pub fn new(payload_type: u8, name: &str, clock_rate: u32, channels: u8) -> Self {
        Self {
            payload_type,
            name: name.to_string(),
            clock_rate,
            channels,
            fmtp: None,
        }
    }

    /// Case-insensitive match on name, clock rate and channels
    pub fn matches(&self, name: &str, clock_rate: u32, channels: u8) -> bool {
        self.name.eq_ignore_ascii_case(name)
            && self.clock_rate == clock_rate
            && self.channels == channels
    }

    /// The `rtpmap` attribute value for this format
    pub fn rtpmap_value(&self) -> String {
        if self.channels > 1 {
            format!(
                "{} {}/{}/{}",
                self.payload_type, self.name, self.clock_rate, self.channels
            )
        } else {
            format!("{} {}/{}", self.payload_type, self.name, self.clock_rate)
        }
    }
}

impl fmt::Display for SdpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.clock_rate)?;
        if self.channels > 1 {
            write!(f, "/{}", self.channels)?;
        }
        Ok(())
    }
}

fn encoding_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')(input)
}

fn rtpmap_parser(input: &str) -> IResult<&str, (u32, &str, u32, Option<u32>)> {
    let (input, pt) = nom_u32(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, name) = encoding_name(input)?;
    let (input, _) = tag("/")(input)?;
    let (input, clock) = nom_u32(input)?;
    let (input, channels) = opt(preceded(tag("/"), nom_u32))(input)?;
    Ok((input, (pt, name, clock, channels)))
}

/// Parse an `rtpmap` attribute value, e.g. `"0 PCMU/8000"` or
/// `"96 opus/48000/2"`.
pub fn parse_rtpmap(value: &str) -> Result<SdpFormat> {
    let (pt, name, clock_rate, channels) = to_result(
        rtpmap_parser(value.trim()),
        &format!("Invalid rtpmap attribute: {}", value),
    )?;

    if pt > 127 {
        return Err(Error::Parse(format!("rtpmap payload type out of range: {}", pt)));
    }

    Ok(SdpFormat {
        payload_type: pt as u8,
        name: name.to_string(),
        clock_rate,
        channels: channels.unwrap_or(1) as u8,
        fmtp: None,
    })
}

/// Parse an `fmtp` attribute value into payload type and parameter string
pub fn parse_fmtp(value: &str) -> Result<(u8, String)> {
    let value = value.trim();
    let (pt, params) = value
        .split_once(' ')
        .ok_or_else(|| Error::Parse(format!("Invalid fmtp attribute: {}", value)))?;
    let pt: u8 = pt
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid fmtp payload type: {}", value)))?;
    Ok((pt, params.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rtpmap_basic() {
        let fmt = parse_rtpmap("0 PCMU/8000").unwrap();
        assert_eq!(fmt.payload_type, 0);
        assert_eq!(fmt.name, "PCMU");
        assert_eq!(fmt.clock_rate, 8000);
        assert_eq!(fmt.channels, 1);
    }

    #[test]
    fn test_parse_rtpmap_with_channels() {
        let fmt = parse_rtpmap("96 opus/48000/2").unwrap();
        assert_eq!(fmt.payload_type, 96);
        assert_eq!(fmt.name, "opus");
        assert_eq!(fmt.clock_rate, 48_000);
        assert_eq!(fmt.channels, 2);
    }

    #[test]
    fn test_parse_rtpmap_rejects_garbage() {
        assert!(parse_rtpmap("PCMU/8000").is_err());
        assert!(parse_rtpmap("0 PCMU").is_err());
        assert!(parse_rtpmap("200 PCMU/8000").is_err());
        assert!(parse_rtpmap("").is_err());
    }

    #[test]
    fn test_rtpmap_value_roundtrip() {
        for value in ["0 PCMU/8000", "96 opus/48000/2", "101 telephone-event/8000"] {
            let fmt = parse_rtpmap(value).unwrap();
            assert_eq!(fmt.rtpmap_value(), value);
        }
    }

    #[test]
    fn test_matches_case_insensitive() {
        let fmt = parse_rtpmap("8 PCMA/8000").unwrap();
        assert!(fmt.matches("pcma", 8000, 1));
        assert!(fmt.matches("PCMA", 8000, 1));
        assert!(!fmt.matches("PCMA", 16_000, 1));
        assert!(!fmt.matches("PCMA", 8000, 2));
    }

    #[test]
    fn test_parse_fmtp() {
        let (pt, params) = parse_fmtp("101 0-15").unwrap();
        assert_eq!(pt, 101);
        assert_eq!(params, "0-15");

        assert!(parse_fmtp("101").is_err());
    }
}
