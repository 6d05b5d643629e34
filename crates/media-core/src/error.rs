use thiserror::Error;

/// Errors surfaced by the media pipelines
#[derive(Debug, Error)]
pub enum Error {
    /// Input to an encoder, decoder or packetizer was malformed
    #[error("Bad media input: {0}")]
    BadInput(String),

    /// An output buffer was too small for the produced data
    #[error("Insufficient buffer: required {required}, available {available}")]
    InsufficientBuffer {
        /// Bytes or samples required
        required: usize,
        /// Bytes or samples available
        available: usize,
    },

    /// No codec, filter or driver with the requested identity is registered
    #[error("Not found: {0}")]
    NotFound(String),

    /// An encoder or decoder failed internally
    #[error("Codec fault: {0}")]
    Codec(String),

    /// A capture or playback driver failed
    #[error("Device fault: {0}")]
    Device(String),

    /// The pipeline is not in a state where the operation is valid
    #[error("Invalid pipeline state: {0}")]
    InvalidState(&'static str),

    /// Transport-level failure
    #[error(transparent)]
    Rtp(#[from] softsip_rtp_core::Error),

    /// Negotiation-level failure
    #[error(transparent)]
    Sdp(#[from] softsip_sdp_core::Error),
}
