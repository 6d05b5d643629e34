//! Parsers for the media-level attributes the engine consumes
//!
//! Each attribute family gets its own module with a nom-based parser and
//! the corresponding value type.

pub mod direction;
pub mod rtcp;
pub mod rtpmap;

use nom::IResult;

use crate::error::Error;
use crate::Result;

/// Convert a nom result into a crate result, requiring full consumption
pub(crate) fn to_result<T>(result: IResult<&str, T>, context: &str) -> Result<T> {
    match result {
        Ok(("", value)) => Ok(value),
        Ok((rest, _)) => Err(Error::Parse(format!(
            "{}: trailing input {:?}",
            context, rest
        ))),
        Err(_) => Err(Error::Parse(context.to_string())),
    }
}

/// Parse a `ptime` attribute value (packet time in milliseconds)
pub fn parse_ptime(value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid ptime attribute: {}", value)))
}

/// Parse a `framerate` attribute value; fractional rates are truncated
pub fn parse_framerate(value: &str) -> Result<u32> {
    let value = value.trim();
    let integral = value.split('.').next().unwrap_or(value);
    integral
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid framerate attribute: {}", value)))
}

/// Parse a `label` attribute value
pub fn parse_label(value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid label attribute: {}", value)))
}
