//! Media pipelines for the softsip engine.
//!
//! The application-facing pieces are the [`audio::AudioPipeline`] and
//! [`video::VideoPipeline`], each composing capture, encode, RTP
//! transport, jitter-buffered receive, decode and playback around one
//! [`stream::MediaStream`]. Codec, filter and device implementations are
//! registered process-wide and looked up by name during negotiation.
//!
//! ```text
//!  .    .-------.   .-------.   .--------.   .--------.   .--------.
//!  |    |       |   |       |   |        |   |        |   |        |
//!  |O-->|source |-->|  buf  |-->| resamp |-->| filter |-->| encode |---> RTP
//!  |    |       |   |       |   |        |   |        |   |        |
//!  '    '-------'   '-------'   '--------'   '--------'   '--------'
//! ```

pub mod audio;
pub mod codec;
pub mod device;
pub mod dtmf;
pub mod error;
pub mod filter;
pub mod resamp;
pub mod stream;
pub mod types;
pub mod video;

pub use error::Error;
pub use types::{AudioParams, VideoParams, VidSize};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Scratch sample buffer size: covers one frame of 48 kHz stereo at 20 ms
pub const SAMPLE_SCRATCH: usize = 1920;

/// Register everything this crate ships by default: the G.711 and L16
/// audio codecs and the built-in test device drivers. Call once at
/// process start, before any call is placed.
pub fn init() {
    codec::register_default_audio_codecs();
    device::register_default_drivers();
    video::device::register_default_video_drivers();
}
