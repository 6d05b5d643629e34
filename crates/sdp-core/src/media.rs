//! Media descriptions: one `m=` section with its formats and attributes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::direction::MediaDirection;
use crate::attributes::rtpmap::SdpFormat;
use crate::error::Error;
use crate::{Result, PT_DYNAMIC_MAX, PT_DYNAMIC_MIN};

/// Kind of a media section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// `m=audio`
    Audio,
    /// `m=video`
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(Error::Parse(format!("unsupported media kind: {}", other))),
        }
    }
}

/// One media section of a session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Media kind
    pub kind: MediaKind,

    /// RTP port; 0 disables the media
    pub port: u16,

    /// Transport profile, e.g. `RTP/AVP`
    pub proto: String,

    /// Formats in preference order
    pub formats: Vec<SdpFormat>,

    /// Explicit RTCP port (`a=rtcp`), when it differs from RTP port + 1
    pub rtcp_port: Option<u16>,

    /// Media direction; `None` means the implied sendrecv
    pub direction: Option<MediaDirection>,

    /// Packet time in milliseconds (`a=ptime`)
    pub ptime: Option<u32>,

    /// RTCP multiplexed on the RTP port (`a=rtcp-mux`)
    pub rtcp_mux: bool,

    /// Peer supports `nack pli` feedback (`a=rtcp-fb`)
    pub nack_pli: bool,

    /// Nominal frame rate for video (`a=framerate`)
    pub framerate: Option<u32>,

    /// Media stream label (`a=label`)
    pub label: Option<u32>,

    /// Application-specific bandwidth in kbit/s (`b=AS`)
    pub bandwidth_as: Option<u32>,
}

impl MediaDescription {
    /// Create an empty media section
    pub fn new(kind: MediaKind, port: u16) -> Self {
        Self {
            kind,
            port,
            proto: "RTP/AVP".to_string(),
            formats: Vec::new(),
            rtcp_port: None,
            direction: None,
            ptime: None,
            rtcp_mux: false,
            nack_pli: false,
            framerate: None,
            label: None,
            bandwidth_as: None,
        }
    }

    /// Effective direction: the implied default is sendrecv
    pub fn effective_direction(&self) -> MediaDirection {
        self.direction.unwrap_or_default()
    }

    /// Effective RTCP port: explicit attribute, mux, or RTP port + 1
    pub fn effective_rtcp_port(&self) -> u16 {
        if self.rtcp_mux {
            self.port
        } else {
            self.rtcp_port.unwrap_or(self.port + 1)
        }
    }

    /// Look up a format by payload type
    pub fn format_by_pt(&self, payload_type: u8) -> Option<&SdpFormat> {
        self.formats.iter().find(|f| f.payload_type == payload_type)
    }

    /// First format matching name, clock rate and channels
    /// (case-insensitive on the name)
    pub fn find_format(&self, name: &str, clock_rate: u32, channels: u8) -> Option<&SdpFormat> {
        self.formats
            .iter()
            .find(|f| f.matches(name, clock_rate, channels))
    }

    /// Whether a payload type is taken by any format of this section
    pub fn pt_in_use(&self, payload_type: u8) -> bool {
        self.format_by_pt(payload_type).is_some()
    }

    /// Allocate a payload type for a new format.
    ///
    /// A static payload type below the dynamic range is used as-is when
    /// free. Otherwise the preferred dynamic value is tried first, then
    /// the dynamic range bottom-up.
    pub fn allocate_pt(&self, preferred: Option<u8>) -> Result<u8> {
        if let Some(pt) = preferred {
            if !self.pt_in_use(pt) {
                return Ok(pt);
            }
        }

        (PT_DYNAMIC_MIN..=PT_DYNAMIC_MAX)
            .find(|pt| !self.pt_in_use(*pt))
            .ok_or(Error::PayloadTypesExhausted)
    }

    /// Find a dynamic payload type not used by any negotiated format,
    /// scanning top-down. Used for keep-alive packets.
    pub fn unused_dynamic_pt(&self) -> Option<u8> {
        (PT_DYNAMIC_MIN..=PT_DYNAMIC_MAX)
            .rev()
            .find(|pt| !self.pt_in_use(*pt))
    }

    /// Append a format, allocating its payload type
    pub fn add_format(
        &mut self,
        preferred_pt: Option<u8>,
        name: &str,
        clock_rate: u32,
        channels: u8,
        fmtp: Option<&str>,
    ) -> Result<u8> {
        let pt = self.allocate_pt(preferred_pt)?;
        let mut format = SdpFormat::new(pt, name, clock_rate, channels);
        format.fmtp = fmtp.map(str::to_string);
        self.formats.push(format);
        Ok(pt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_pt_used_when_free() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        let pt = m.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
        assert_eq!(pt, 8);
    }

    #[test]
    fn test_dynamic_allocation_avoids_collisions() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        m.add_format(Some(96), "codec-a", 8000, 1, None).unwrap();
        let pt = m.add_format(Some(96), "codec-b", 8000, 1, None).unwrap();
        assert_eq!(pt, 97);
    }

    #[test]
    fn test_preferred_telephone_event_pt() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        let pt = m
            .add_format(Some(101), "telephone-event", 8000, 1, Some("0-15"))
            .unwrap();
        assert_eq!(pt, 101);
        assert_eq!(m.format_by_pt(101).unwrap().fmtp.as_deref(), Some("0-15"));
    }

    #[test]
    fn test_exhaustion() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        for i in 0..=(PT_DYNAMIC_MAX - PT_DYNAMIC_MIN) {
            m.add_format(None, &format!("c{}", i), 8000, 1, None).unwrap();
        }
        assert!(matches!(
            m.add_format(None, "one-too-many", 8000, 1, None),
            Err(Error::PayloadTypesExhausted)
        ));
        assert_eq!(m.unused_dynamic_pt(), None);
    }

    #[test]
    fn test_effective_rtcp_port() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        assert_eq!(m.effective_rtcp_port(), 10_001);

        m.rtcp_port = Some(53_020);
        assert_eq!(m.effective_rtcp_port(), 53_020);

        m.rtcp_mux = true;
        assert_eq!(m.effective_rtcp_port(), 10_000);
    }

    #[test]
    fn test_unused_dynamic_pt_scans_top_down() {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        m.add_format(Some(96), "x", 8000, 1, None).unwrap();
        assert_eq!(m.unused_dynamic_pt(), Some(127));
    }
}
