//! Media direction attributes (sendrecv, sendonly, recvonly, inactive)
//! as defined in RFC 8866.

use std::fmt;

use nom::{branch::alt, bytes::complete::tag, combinator::map, IResult};
use serde::{Deserialize, Serialize};

use super::to_result;
use crate::Result;

/// SDP media direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaDirection {
    /// Endpoint can send and receive media
    SendRecv,
    /// Endpoint can only send media
    SendOnly,
    /// Endpoint can only receive media
    RecvOnly,
    /// Endpoint neither sends nor receives media
    Inactive,
}

impl MediaDirection {
    /// Whether this direction permits transmitting media
    pub fn can_send(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    /// Whether this direction permits receiving media
    pub fn can_recv(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }

    /// The direction seen from the other side of the dialog
    pub fn reversed(self) -> Self {
        match self {
            MediaDirection::SendOnly => MediaDirection::RecvOnly,
            MediaDirection::RecvOnly => MediaDirection::SendOnly,
            other => other,
        }
    }
}

impl Default for MediaDirection {
    fn default() -> Self {
        MediaDirection::SendRecv
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDirection::SendRecv => write!(f, "sendrecv"),
            MediaDirection::SendOnly => write!(f, "sendonly"),
            MediaDirection::RecvOnly => write!(f, "recvonly"),
            MediaDirection::Inactive => write!(f, "inactive"),
        }
    }
}

fn direction_parser(input: &str) -> IResult<&str, MediaDirection> {
    alt((
        map(tag("sendrecv"), |_| MediaDirection::SendRecv),
        map(tag("sendonly"), |_| MediaDirection::SendOnly),
        map(tag("recvonly"), |_| MediaDirection::RecvOnly),
        map(tag("inactive"), |_| MediaDirection::Inactive),
    ))(input)
}

/// Parse a direction attribute name
pub fn parse_direction(value: &str) -> Result<MediaDirection> {
    to_result(
        direction_parser(value.trim()),
        &format!("Invalid direction attribute: {}", value),
    )
}
