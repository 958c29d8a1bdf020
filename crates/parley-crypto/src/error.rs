//! Crypto error types.

use thiserror::Error;

/// Errors from sealing, opening or key handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication failed: wrong key or tampered ciphertext
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What went wrong
        reason: String,
    },

    /// Envelope text could not be parsed
    #[error("malformed encrypted envelope")]
    MalformedEnvelope,

    /// Key material has the wrong length
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// Decrypted bytes are not UTF-8
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}
