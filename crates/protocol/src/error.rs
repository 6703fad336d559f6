//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The frame could not be parsed into a known message, or a required
    /// field was missing.
    #[error("malformed message: {0}")]
    Deserialization(String),

    /// The message payload did not match its declared encoding.
    #[error("invalid {encoding} data: {reason}")]
    InvalidEncoding {
        /// Declared encoding of the payload.
        encoding: &'static str,
        /// Decoder failure description.
        reason: String,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidEncoding {
            encoding: "base64",
            reason: err.to_string(),
        }
    }
}
