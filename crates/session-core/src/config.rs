//! Engine configuration

use serde::{Deserialize, Serialize};

use softsip_media_core::audio::AudioConfig;
use softsip_media_core::video::VideoConfig;
use softsip_rtp_core::session::RtpSessionConfig;

/// Inclusive range of unsigned values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeU32 {
    /// Lower bound
    pub min: u32,

    /// Upper bound
    pub max: u32,
}

impl RangeU32 {
    /// Create a range
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Whether `v` lies inside the range
    pub fn contains(&self, v: u32) -> bool {
        self.min <= v && v <= self.max
    }
}

/// Per-call configuration
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Local URI, used for RTCP CNAME and SDP origin username
    pub local_uri: String,

    /// Audio pipeline configuration
    pub audio: AudioConfig,

    /// Video pipeline configuration; `None` disables video entirely
    pub video: Option<VideoConfig>,

    /// RTP transport configuration (one port pair per media)
    pub rtp: RtpSessionConfig,

    /// Audio codecs outside this sample-rate range are not offered
    pub audio_srate: RangeU32,

    /// Audio codecs outside this channel-count range are not offered
    pub audio_channels: RangeU32,

    /// Audio bandwidth advertised via `b=AS`, in kbit/s
    pub audio_bandwidth_kbps: u32,

    /// Seconds an unanswered incoming call rings before local close
    pub ring_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            local_uri: "sip:softsip@localhost".to_string(),
            audio: AudioConfig::default(),
            video: None,
            rtp: RtpSessionConfig::default(),
            audio_srate: RangeU32::new(8000, 48_000),
            audio_channels: RangeU32::new(1, 2),
            audio_bandwidth_kbps: 128,
            ring_timeout_secs: 120,
        }
    }
}
