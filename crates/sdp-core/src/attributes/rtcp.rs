//! RTCP-related attributes: `rtcp`, `rtcp-mux` and `rtcp-fb`

use crate::error::Error;
use crate::Result;

/// Parse an `rtcp` attribute value into the RTCP port.
///
/// Only the port form is consumed; an optional trailing address is
/// accepted and ignored.
pub fn parse_rtcp_port(value: &str) -> Result<u16> {
    let value = value.trim();
    let port_part = value.split_whitespace().next().unwrap_or(value);
    port_part
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid rtcp attribute: {}", value)))
}

/// Check an `rtcp-fb` attribute value for `nack pli` support (RFC 4585).
///
/// The original accepts any payload-type qualifier; only the feedback
/// parameters are significant.
pub fn rtcp_fb_is_nack_pli(value: &str) -> bool {
    let mut parts = value.split_whitespace();
    let _pt = parts.next();
    matches!(
        (parts.next(), parts.next()),
        (Some("nack"), Some("pli"))
    )
}
