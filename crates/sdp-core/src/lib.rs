//! SDP support for the softsip media engine.
//!
//! Implements the subset of RFC 8866 the engine produces and consumes:
//! session and media descriptions with `rtpmap`, `fmtp`, `ptime`,
//! direction attributes, `rtcp-fb`, `rtcp-mux`, `framerate`, `label` and
//! `b=AS` bandwidth, plus the offer/answer rules used for codec
//! negotiation and hold/resume.

pub mod attributes;
pub mod error;
pub mod media;
pub mod negotiate;
pub mod session;

pub use attributes::direction::MediaDirection;
pub use attributes::rtpmap::SdpFormat;
pub use error::Error;
pub use media::{MediaDescription, MediaKind};
pub use session::SdpSession;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// First dynamic RTP payload type available for negotiation
pub const PT_DYNAMIC_MIN: u8 = 96;

/// Last dynamic RTP payload type
pub const PT_DYNAMIC_MAX: u8 = 127;

/// Preferred payload type for telephone-event media, when free
pub const PT_TELEPHONE_EVENT_PREFERRED: u8 = 101;

/// Format name of RFC 4733 telephone events
pub const TELEPHONE_EVENT: &str = "telephone-event";
