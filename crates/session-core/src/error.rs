use thiserror::Error;

use crate::call::CallState;

/// Errors surfaced by call control
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is not valid in the call's current state
    #[error("Invalid call state {state:?} for {operation}")]
    InvalidState {
        /// Current state
        state: CallState,
        /// Attempted operation
        operation: &'static str,
    },

    /// The peer's description had no codec in common with ours
    #[error(transparent)]
    Negotiation(#[from] softsip_sdp_core::Error),

    /// A pipeline operation failed
    #[error(transparent)]
    Media(#[from] softsip_media_core::Error),

    /// Transport setup failed
    #[error(transparent)]
    Rtp(#[from] softsip_rtp_core::Error),

    /// The requested codec is not registered locally
    #[error("Codec not registered: {0}")]
    CodecNotFound(String),
}
