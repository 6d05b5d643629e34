//! Video codec interface and registry
//!
//! A video codec couples encoder/decoder factories with the payload
//! packetization for its RTP format. The encoder and decoder proper are
//! supplied by plugin crates; the packetizers for H.264 and VP8 live in
//! this crate and are reused by those plugins.

use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::types::{VideoFrame, VideoParams};
use crate::Result;

/// Identity of a video codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCodecInfo {
    /// Encoding name as used in SDP
    pub name: &'static str,

    /// RTP clock rate; 90 kHz for all current video formats
    pub clock_rate: u32,

    /// Static payload type, if any
    pub static_pt: Option<u8>,

    /// Default fmtp parameters offered for this codec
    pub default_fmtp: Option<&'static str>,
}

/// One encoded picture
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// The coded bitstream (for H.264: Annex B with start codes)
    pub data: Vec<u8>,

    /// Whether this is an intra frame
    pub keyframe: bool,
}

/// Per-direction encoder state
pub trait VideoEncoder: Send {
    /// Encode one raw frame; `keyframe` forces an intra picture
    fn encode(&mut self, frame: &VideoFrame, keyframe: bool) -> Result<EncodedFrame>;
}

/// Per-direction decoder state
pub trait VideoDecoder: Send {
    /// Decode one assembled frame. `Ok(None)` means no full picture yet.
    fn decode(&mut self, data: &[u8]) -> Result<Option<VideoFrame>>;
}

/// Splits one encoded frame into RTP payloads
pub trait VideoPacketizer: Send {
    /// Emit payloads of at most `max_size` bytes; `last` is set on the
    /// final packet of the frame (it carries the RTP marker).
    fn packetize(
        &mut self,
        frame: &EncodedFrame,
        max_size: usize,
        emit: &mut dyn FnMut(bool, &[u8]) -> Result<()>,
    ) -> Result<()>;
}

/// Reassembles RTP payloads into frames
pub trait VideoDepacketizer: Send {
    /// Accumulate one payload; returns the assembled frame once complete
    /// (normally on the marker packet).
    fn depacketize(&mut self, marker: bool, payload: &[u8]) -> Result<Option<Bytes>>;
}

/// A video codec descriptor
pub trait VideoCodec: Send + Sync {
    /// Codec identity
    fn info(&self) -> &VideoCodecInfo;

    /// Create encoder state
    fn encoder(&self, params: &VideoParams, fmtp: Option<&str>) -> Result<Box<dyn VideoEncoder>>;

    /// Create decoder state
    fn decoder(&self, fmtp: Option<&str>) -> Result<Box<dyn VideoDecoder>>;

    /// Create the payload packetizer for this codec's RTP format
    fn packetizer(&self) -> Box<dyn VideoPacketizer>;

    /// Create the payload depacketizer
    fn depacketizer(&self) -> Box<dyn VideoDepacketizer>;
}

static VIDEO_CODECS: Lazy<RwLock<Vec<Arc<dyn VideoCodec>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Append a codec to the registry; init/module-load time only
pub fn register_video_codec(codec: Arc<dyn VideoCodec>) {
    VIDEO_CODECS.write().push(codec);
}

/// All registered video codecs in registration order
pub fn video_codecs() -> Vec<Arc<dyn VideoCodec>> {
    VIDEO_CODECS.read().clone()
}

/// First codec matching the name, case-insensitively
pub fn find_video_codec(name: &str) -> Option<Arc<dyn VideoCodec>> {
    VIDEO_CODECS
        .read()
        .iter()
        .find(|codec| codec.info().name.eq_ignore_ascii_case(name))
        .cloned()
}

/// Remove every registered video codec (used between tests)
pub fn clear_video_codecs() {
    VIDEO_CODECS.write().clear();
}
