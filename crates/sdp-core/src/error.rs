use thiserror::Error;

/// Errors produced while parsing or negotiating SDP
#[derive(Debug, Error)]
pub enum Error {
    /// A line or attribute value could not be parsed
    #[error("Invalid SDP: {0}")]
    Parse(String),

    /// A required line was missing from the description
    #[error("Missing SDP line: {0}")]
    MissingLine(&'static str),

    /// No common format between local and remote descriptions
    #[error("No matching format for {0} media")]
    NoMatch(&'static str),

    /// All dynamic payload types are taken
    #[error("No free dynamic payload type")]
    PayloadTypesExhausted,
}
