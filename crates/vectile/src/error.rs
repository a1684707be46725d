//! Error types for tile reading and scheduling.

use std::fmt;

use vectile_decode::DecodeError;

/// Result type for vectile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading tiles.
#[derive(Debug)]
pub enum Error {
    /// A feature record failed to decode.
    Decode(DecodeError),
    /// The tile source failed to produce a tile's records.
    Source {
        /// Context for where the error occurred.
        context: &'static str,
        /// The error message.
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Source { context, message } => {
                write!(f, "tile source {context} failed: {message}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            Error::Source { .. } => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}
