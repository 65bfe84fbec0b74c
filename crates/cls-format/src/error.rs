use thiserror::Error;

/// Violation of the container model contract. Always a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid field {name:?}: {reason}")]
    InvalidField { name: String, reason: &'static str },

    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
}

/// Failure to decode container text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unsupported container version line: {0:?}")]
    UnsupportedVersion(String),

    #[error("separator field not found in header")]
    MissingSeparator,

    #[error("invalid field at line {line}")]
    InvalidFieldLine { line: usize },
}
