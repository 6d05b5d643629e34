//! Audio codec interface and registry
//!
//! Codecs register process-wide at startup; registration order is
//! preserved and determines offer preference. Lookup matches the name
//! case-insensitively, plus clock rate and channel count when given.

pub mod g711;
pub mod l16;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::types::AudioParams;
use crate::Result;

/// Identity of an audio codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCodecInfo {
    /// Encoding name as used in SDP
    pub name: &'static str,

    /// RTP clock rate in Hz (what goes into the rtpmap)
    pub clock_rate: u32,

    /// Channel count
    pub channels: u8,

    /// Static payload type, if the codec has one
    pub static_pt: Option<u8>,

    /// Default fmtp parameters offered for this codec
    pub default_fmtp: Option<&'static str>,
}

/// Per-direction encoder state
pub trait AudioEncoder: Send {
    /// Encode one frame of interleaved samples into `out`, returning the
    /// number of bytes written.
    fn encode(&mut self, samples: &[i16], out: &mut [u8]) -> Result<usize>;
}

/// Per-direction decoder state
pub trait AudioDecoder: Send {
    /// Decode one packet into `out`, returning the number of samples
    /// written.
    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize>;

    /// Synthesize one frame when no packet arrived. The default reports
    /// no concealment support.
    fn conceal(&mut self, _out: &mut [i16]) -> Result<usize> {
        Ok(0)
    }

    /// Whether [`AudioDecoder::conceal`] produces audio
    fn has_plc(&self) -> bool {
        false
    }
}

/// An audio codec descriptor: identity plus encoder/decoder factories
pub trait AudioCodec: Send + Sync {
    /// Codec identity
    fn info(&self) -> &AudioCodecInfo;

    /// Create encoder state for the negotiated parameters
    fn encoder(&self, params: &AudioParams, fmtp: Option<&str>) -> Result<Box<dyn AudioEncoder>>;

    /// Create decoder state for the negotiated parameters
    fn decoder(&self, fmtp: Option<&str>) -> Result<Box<dyn AudioDecoder>>;
}

/// The sample rate the DSP path runs at for a codec.
///
/// G.722 advertises an 8 kHz RTP clock (RFC 3551 §4.5.2) but processes
/// 16 kHz audio; any codec with the same anomaly belongs in this table.
pub fn dsp_clock_rate(name: &str, clock_rate: u32) -> u32 {
    if name.eq_ignore_ascii_case("G722") {
        16_000
    } else {
        clock_rate
    }
}

/// Whether RTP timestamps for this codec advance at half the sample count
pub fn half_timestamp_rate(name: &str) -> bool {
    name.eq_ignore_ascii_case("G722")
}

static AUDIO_CODECS: Lazy<RwLock<Vec<Arc<dyn AudioCodec>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Append a codec to the registry. Call only during process init or
/// module load; the list is read-only while calls run.
pub fn register_audio_codec(codec: Arc<dyn AudioCodec>) {
    AUDIO_CODECS.write().push(codec);
}

/// All registered codecs in registration order
pub fn audio_codecs() -> Vec<Arc<dyn AudioCodec>> {
    AUDIO_CODECS.read().clone()
}

/// First codec matching the name (case-insensitive) and, when given,
/// clock rate and channel count.
pub fn find_audio_codec(
    name: &str,
    clock_rate: Option<u32>,
    channels: Option<u8>,
) -> Option<Arc<dyn AudioCodec>> {
    AUDIO_CODECS
        .read()
        .iter()
        .find(|codec| {
            let info = codec.info();
            info.name.eq_ignore_ascii_case(name)
                && clock_rate.map_or(true, |r| info.clock_rate == r)
                && channels.map_or(true, |c| info.channels == c)
        })
        .cloned()
}

/// Register the codecs this crate ships: PCMU, PCMA and L16
pub fn register_default_audio_codecs() {
    let mut registry = AUDIO_CODECS.write();
    if registry
        .iter()
        .any(|c| c.info().name.eq_ignore_ascii_case("PCMU"))
    {
        return;
    }
    registry.push(Arc::new(g711::G711Codec::pcmu()));
    registry.push(Arc::new(g711::G711Codec::pcma()));
    registry.push(Arc::new(l16::L16Codec::mono_8k()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        register_default_audio_codecs();

        let pcmu = find_audio_codec("pcmu", Some(8000), Some(1)).unwrap();
        assert_eq!(pcmu.info().static_pt, Some(0));

        assert!(find_audio_codec("PCMA", None, None).is_some());
        assert!(find_audio_codec("PCMA", Some(16_000), None).is_none());
        assert!(find_audio_codec("nosuch", None, None).is_none());
    }

    #[test]
    fn test_registration_order_preserved() {
        register_default_audio_codecs();
        let names: Vec<&str> = audio_codecs().iter().map(|c| c.info().name).collect();
        let pcmu = names.iter().position(|n| *n == "PCMU").unwrap();
        let pcma = names.iter().position(|n| *n == "PCMA").unwrap();
        assert!(pcmu < pcma);
    }

    #[test]
    fn test_g722_clock_anomaly() {
        assert_eq!(dsp_clock_rate("G722", 8000), 16_000);
        assert_eq!(dsp_clock_rate("g722", 8000), 16_000);
        assert_eq!(dsp_clock_rate("PCMU", 8000), 8000);
        assert!(half_timestamp_rate("G722"));
        assert!(!half_timestamp_rate("PCMA"));
    }
}
