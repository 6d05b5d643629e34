//! Session descriptions: parsing and serialization
//!
//! The serializer emits a normalized form: re-parsing and re-serializing
//! a description produced here yields the identical text.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::{
    self,
    direction::parse_direction,
    rtcp::{parse_rtcp_port, rtcp_fb_is_nack_pli},
    rtpmap::{parse_fmtp, parse_rtpmap, SdpFormat},
};
use crate::error::Error;
use crate::media::{MediaDescription, MediaKind};
use crate::Result;

/// `o=` line of a session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Originating username; `-` when unknown
    pub username: String,

    /// Session identifier
    pub session_id: u64,

    /// Session version, incremented per modification
    pub session_version: u64,

    /// Origin address
    pub address: IpAddr,
}

/// A complete session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpSession {
    /// Origin line
    pub origin: Origin,

    /// Session name (`s=`); `-` by convention
    pub name: String,

    /// Session-level connection address
    pub connection: IpAddr,

    /// `a=tool` value
    pub tool: Option<String>,

    /// Media sections in order
    pub media: Vec<MediaDescription>,
}

impl SdpSession {
    /// Create an empty session originating from the given address
    pub fn new(address: IpAddr) -> Self {
        let session_id: u32 = rand::thread_rng().gen();
        Self {
            origin: Origin {
                username: "-".to_string(),
                session_id: session_id as u64,
                session_version: session_id as u64,
                address,
            },
            name: "-".to_string(),
            connection: address,
            tool: None,
            media: Vec::new(),
        }
    }

    /// Bump the session version for a modified description (re-INVITE)
    pub fn bump_version(&mut self) {
        self.origin.session_version += 1;
    }

    /// The media section of the given kind, if present
    pub fn media_of_kind(&self, kind: MediaKind) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.kind == kind)
    }

    /// Mutable access to the media section of the given kind
    pub fn media_of_kind_mut(&mut self, kind: MediaKind) -> Option<&mut MediaDescription> {
        self.media.iter_mut().find(|m| m.kind == kind)
    }

    /// Parse a session description
    pub fn parse(input: &str) -> Result<Self> {
        let mut origin = None;
        let mut name = "-".to_string();
        let mut connection = None;
        let mut tool = None;
        let mut media: Vec<MediaDescription> = Vec::new();
        let mut seen_version = false;

        for raw in input.lines() {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let (kind, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Parse(format!("malformed line: {}", line)))?;

            match kind {
                "v" => {
                    if value != "0" {
                        return Err(Error::Parse(format!("unsupported version: {}", value)));
                    }
                    seen_version = true;
                }
                "o" => origin = Some(parse_origin(value)?),
                "s" => name = value.to_string(),
                "c" => {
                    let addr = parse_connection(value)?;
                    if connection.is_none() {
                        connection = Some(addr);
                    }
                }
                "t" => {} // timing is always 0 0 for calls
                "b" => {
                    if let Some(m) = media.last_mut() {
                        if let Some(bw) = value.strip_prefix("AS:") {
                            m.bandwidth_as = bw.parse().ok();
                        }
                    }
                }
                "m" => media.push(parse_media_line(value)?),
                "a" => {
                    let (attr, attr_value) = match value.split_once(':') {
                        Some((a, v)) => (a, Some(v)),
                        None => (value, None),
                    };

                    match media.last_mut() {
                        Some(m) => apply_media_attribute(m, attr, attr_value)?,
                        None => {
                            if attr == "tool" {
                                tool = attr_value.map(str::to_string);
                            }
                        }
                    }
                }
                // unknown line types are tolerated
                other => debug!(kind = other, "ignoring SDP line"),
            }
        }

        if !seen_version {
            return Err(Error::MissingLine("v"));
        }
        let origin = origin.ok_or(Error::MissingLine("o"))?;
        let connection = connection.ok_or(Error::MissingLine("c"))?;

        Ok(Self {
            origin,
            name,
            connection,
            tool,
            media,
        })
    }
}

fn parse_origin(value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(Error::Parse(format!("malformed origin: {}", value)));
    }

    let session_id = fields[1]
        .parse()
        .map_err(|_| Error::Parse(format!("bad session id: {}", fields[1])))?;
    let session_version = fields[2]
        .parse()
        .map_err(|_| Error::Parse(format!("bad session version: {}", fields[2])))?;
    let address = IpAddr::from_str(fields[5])
        .map_err(|_| Error::Parse(format!("bad origin address: {}", fields[5])))?;

    Ok(Origin {
        username: fields[0].to_string(),
        session_id,
        session_version,
        address,
    })
}

fn parse_connection(value: &str) -> Result<IpAddr> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 3 || fields[0] != "IN" {
        return Err(Error::Parse(format!("malformed connection: {}", value)));
    }
    IpAddr::from_str(fields[2]).map_err(|_| Error::Parse(format!("bad address: {}", fields[2])))
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(Error::Parse(format!("malformed media line: {}", value)));
    }

    let kind: MediaKind = fields[0].parse()?;
    let port: u16 = fields[1]
        .parse()
        .map_err(|_| Error::Parse(format!("bad media port: {}", fields[1])))?;

    let mut media = MediaDescription::new(kind, port);
    media.proto = fields[2].to_string();

    for pt_str in &fields[3..] {
        let pt: u8 = pt_str
            .parse()
            .map_err(|_| Error::Parse(format!("bad payload type: {}", pt_str)))?;
        media.formats.push(static_default_format(pt));
    }

    Ok(media)
}

/// Placeholder for a payload type listed on the `m=` line before its
/// rtpmap arrives; static types get their RFC 3551 definitions.
fn static_default_format(pt: u8) -> SdpFormat {
    match pt {
        0 => SdpFormat::new(0, "PCMU", 8000, 1),
        8 => SdpFormat::new(8, "PCMA", 8000, 1),
        9 => SdpFormat::new(9, "G722", 8000, 1),
        13 => SdpFormat::new(13, "CN", 8000, 1),
        18 => SdpFormat::new(18, "G729", 8000, 1),
        _ => SdpFormat::new(pt, "", 0, 1),
    }
}

fn apply_media_attribute(
    media: &mut MediaDescription,
    attr: &str,
    value: Option<&str>,
) -> Result<()> {
    match (attr, value) {
        ("rtpmap", Some(v)) => {
            let parsed = parse_rtpmap(v)?;
            match media
                .formats
                .iter_mut()
                .find(|f| f.payload_type == parsed.payload_type)
            {
                Some(slot) => {
                    let fmtp = slot.fmtp.take();
                    *slot = parsed;
                    slot.fmtp = fmtp;
                }
                None => media.formats.push(parsed),
            }
        }
        ("fmtp", Some(v)) => {
            let (pt, params) = parse_fmtp(v)?;
            if let Some(slot) = media.formats.iter_mut().find(|f| f.payload_type == pt) {
                slot.fmtp = Some(params);
            }
        }
        ("ptime", Some(v)) => media.ptime = Some(attributes::parse_ptime(v)?),
        ("framerate", Some(v)) => media.framerate = Some(attributes::parse_framerate(v)?),
        ("label", Some(v)) => media.label = Some(attributes::parse_label(v)?),
        ("rtcp", Some(v)) => media.rtcp_port = Some(parse_rtcp_port(v)?),
        ("rtcp-mux", None) => media.rtcp_mux = true,
        ("rtcp-fb", Some(v)) => {
            if rtcp_fb_is_nack_pli(v) {
                media.nack_pli = true;
            }
        }
        ("sendrecv", None) | ("sendonly", None) | ("recvonly", None) | ("inactive", None) => {
            media.direction = Some(parse_direction(attr)?);
        }
        // unknown attributes (ICE, DTLS, ...) belong to collaborators
        _ => {}
    }
    Ok(())
}

impl fmt::Display for SdpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v=0\r")?;
        writeln!(
            f,
            "o={} {} {} IN {} {}\r",
            self.origin.username,
            self.origin.session_id,
            self.origin.session_version,
            ip_type(&self.origin.address),
            self.origin.address
        )?;
        writeln!(f, "s={}\r", self.name)?;
        writeln!(
            f,
            "c=IN {} {}\r",
            ip_type(&self.connection),
            self.connection
        )?;
        writeln!(f, "t=0 0\r")?;
        if let Some(tool) = &self.tool {
            writeln!(f, "a=tool:{}\r", tool)?;
        }

        for media in &self.media {
            write!(f, "m={} {} {}", media.kind, media.port, media.proto)?;
            for format in &media.formats {
                write!(f, " {}", format.payload_type)?;
            }
            writeln!(f, "\r")?;

            if let Some(bw) = media.bandwidth_as {
                writeln!(f, "b=AS:{}\r", bw)?;
            }
            if let Some(rtcp_port) = media.rtcp_port {
                writeln!(f, "a=rtcp:{}\r", rtcp_port)?;
            }
            if media.rtcp_mux {
                writeln!(f, "a=rtcp-mux\r")?;
            }
            if let Some(label) = media.label {
                writeln!(f, "a=label:{}\r", label)?;
            }
            for format in &media.formats {
                writeln!(f, "a=rtpmap:{}\r", format.rtpmap_value())?;
            }
            for format in &media.formats {
                if let Some(fmtp) = &format.fmtp {
                    writeln!(f, "a=fmtp:{} {}\r", format.payload_type, fmtp)?;
                }
            }
            if media.nack_pli {
                writeln!(f, "a=rtcp-fb:* nack pli\r")?;
            }
            if let Some(framerate) = media.framerate {
                writeln!(f, "a=framerate:{}\r", framerate)?;
            }
            if let Some(ptime) = media.ptime {
                writeln!(f, "a=ptime:{}\r", ptime)?;
            }
            if let Some(direction) = media.direction {
                writeln!(f, "a={}\r", direction)?;
            }
        }

        Ok(())
    }
}

fn ip_type(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MediaDirection;

    fn sample() -> SdpSession {
        let mut session = SdpSession::new(IpAddr::from([10, 0, 0, 1]));
        session.tool = Some("softsip 0.1.0".to_string());

        let mut audio = MediaDescription::new(MediaKind::Audio, 10_000);
        audio.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
        audio
            .add_format(Some(101), "telephone-event", 8000, 1, Some("0-15"))
            .unwrap();
        audio.ptime = Some(20);
        audio.label = Some(1);
        audio.bandwidth_as = Some(128);
        audio.direction = Some(MediaDirection::SendRecv);
        session.media.push(audio);

        let mut video = MediaDescription::new(MediaKind::Video, 10_002);
        video.add_format(Some(96), "H264", 90_000, 1, None).unwrap();
        video.nack_pli = true;
        video.framerate = Some(30);
        video.label = Some(2);
        session.media.push(video);

        session
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let session = sample();
        let text = session.to_string();
        let parsed = SdpSession::parse(&text).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn test_normalized_fixpoint() {
        let text = sample().to_string();
        let once = SdpSession::parse(&text).unwrap().to_string();
        let twice = SdpSession::parse(&once).unwrap().to_string();
        assert_eq!(once, twice);
        assert_eq!(text, once);
    }

    #[test]
    fn test_parse_foreign_offer() {
        let offer = "v=0\r\n\
                     o=alice 2890844526 2890844526 IN IP4 192.0.2.3\r\n\
                     s=-\r\n\
                     c=IN IP4 192.0.2.3\r\n\
                     t=0 0\r\n\
                     m=audio 49170 RTP/AVP 8 0 101\r\n\
                     a=rtpmap:8 PCMA/8000\r\n\
                     a=rtpmap:0 PCMU/8000\r\n\
                     a=rtpmap:101 telephone-event/8000\r\n\
                     a=fmtp:101 0-15\r\n\
                     a=ptime:30\r\n\
                     a=sendonly\r\n";

        let session = SdpSession::parse(offer).unwrap();
        assert_eq!(session.media.len(), 1);

        let audio = &session.media[0];
        assert_eq!(audio.port, 49_170);
        assert_eq!(audio.formats.len(), 3);
        // preference order follows the m= line
        assert_eq!(audio.formats[0].name, "PCMA");
        assert_eq!(audio.formats[1].name, "PCMU");
        assert_eq!(audio.ptime, Some(30));
        assert_eq!(audio.direction, Some(MediaDirection::SendOnly));
        assert_eq!(audio.format_by_pt(101).unwrap().fmtp.as_deref(), Some("0-15"));
    }

    #[test]
    fn test_static_pt_without_rtpmap() {
        let offer = "v=0\r\n\
                     o=- 1 1 IN IP4 192.0.2.3\r\n\
                     s=-\r\n\
                     c=IN IP4 192.0.2.3\r\n\
                     t=0 0\r\n\
                     m=audio 5004 RTP/AVP 0\r\n";

        let session = SdpSession::parse(offer).unwrap();
        let format = &session.media[0].formats[0];
        assert_eq!(format.name, "PCMU");
        assert_eq!(format.clock_rate, 8000);
    }

    #[test]
    fn test_rtcp_mux_and_fb() {
        let offer = "v=0\r\n\
                     o=- 1 1 IN IP4 192.0.2.3\r\n\
                     s=-\r\n\
                     c=IN IP4 192.0.2.3\r\n\
                     t=0 0\r\n\
                     m=video 5006 RTP/AVP 97\r\n\
                     a=rtpmap:97 VP8/90000\r\n\
                     a=rtcp-mux\r\n\
                     a=rtcp-fb:* nack pli\r\n";

        let session = SdpSession::parse(offer).unwrap();
        let video = &session.media[0];
        assert!(video.rtcp_mux);
        assert!(video.nack_pli);
        assert_eq!(video.effective_rtcp_port(), 5006);
    }

    #[test]
    fn test_missing_required_lines() {
        assert!(SdpSession::parse("").is_err());
        assert!(SdpSession::parse("v=0\r\ns=-\r\n").is_err());
    }

    #[test]
    fn test_unknown_lines_tolerated() {
        let offer = "v=0\r\n\
                     o=- 1 1 IN IP4 192.0.2.3\r\n\
                     s=-\r\n\
                     c=IN IP4 192.0.2.3\r\n\
                     t=0 0\r\n\
                     m=audio 5004 RTP/AVP 0\r\n\
                     a=ice-ufrag:F7gI\r\n\
                     a=candidate:1 1 UDP 2130706431 10.0.1.1 8998 typ host\r\n";

        let session = SdpSession::parse(offer).unwrap();
        assert_eq!(session.media[0].formats.len(), 1);
    }
}
