//! Call control for the softsip media engine.
//!
//! A [`call::Call`] owns one audio pipeline and, when configured and a
//! video codec is registered, one video pipeline. The SIP dialog layer
//! lives outside this crate: it feeds the call with the peer's SDP and
//! signalling events, and carries the descriptions this crate produces
//! in its INVITE/answer bodies. Media lifecycle (device open/close,
//! codec swaps on renegotiation, hold/resume, teardown) happens here.

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;

pub use call::{Call, CallState};
pub use config::{CallConfig, RangeU32};
pub use error::Error;
pub use events::CallEvent;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
