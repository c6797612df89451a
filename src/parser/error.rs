use std::num::ParseFloatError;
use std::str::Utf8Error;
use thiserror::Error;

/// Result type for parser operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Errors a parser cannot recover from.
///
/// Line and token level problems never surface here; they are logged and
/// skipped by the individual parsers.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid value {input:?}: {source}")]
    InvalidValue {
        input: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("content is not valid UTF-8: {0}")]
    Encoding(#[from] Utf8Error),
}
