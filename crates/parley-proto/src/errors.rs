//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from encoding or decoding wire frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Control frame was not valid JSON or did not match any known shape
    #[error("invalid control frame: {0}")]
    InvalidControlFrame(String),

    /// Sync frame failed CBOR decoding
    #[error("invalid sync frame: {0}")]
    InvalidSyncFrame(String),

    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),
}
