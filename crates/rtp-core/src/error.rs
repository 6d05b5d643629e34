use std::io;
use thiserror::Error;

/// Errors produced by the RTP transport layer
#[derive(Debug, Error)]
pub enum Error {
    /// A buffer was too small for the requested operation
    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// A received packet could not be parsed
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(String),

    /// An RTCP packet could not be parsed or built
    #[error("RTCP error: {0}")]
    RtcpError(String),

    /// The packet arrived too late to be useful
    #[error("Packet too late for jitter buffer")]
    JitterLate,

    /// The packet sequence number is already held
    #[error("Duplicate packet in jitter buffer")]
    JitterDuplicate,

    /// No local port could be bound in the configured range
    #[error("No free RTP port in range {min}..={max}")]
    NoPortAvailable {
        /// Lower bound of the configured range
        min: u16,
        /// Upper bound of the configured range
        max: u16,
    },

    /// The session is not in a state where the operation is valid
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),

    /// Socket I/O failed
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}
