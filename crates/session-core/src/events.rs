//! Events emitted to the embedding application

/// Call lifecycle and in-call events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// A new call arrived from this peer
    Incoming(String),

    /// The peer is ringing (provisional response without media)
    Ringing,

    /// Early media is flowing (provisional response with SDP)
    Progress,

    /// The call is answered and media is established
    Established,

    /// The call ended, with a human-readable reason
    Closed(String),

    /// A DTMF digit arrived from the peer
    Dtmf {
        /// Keypad character
        digit: char,
        /// End-of-event flag
        end: bool,
    },
}
