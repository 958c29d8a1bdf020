//! Parley Cryptographic Primitives
//!
//! Room-level symmetric encryption for chat messages. Pure functions with
//! deterministic outputs. Callers provide nonces, so tests can pin them.
//!
//! # Key Lifecycle
//!
//! ```text
//! (room id, passphrase)
//!        │
//!        ▼
//! PBKDF2-HMAC-SHA256 → RoomKey (32 bytes, per room)
//!        │
//!        ▼
//! XChaCha20-Poly1305 (random 24-byte nonce) → EncryptedPayload
//!        │
//!        ▼
//! Envelope codec → "🔒v1.xc20p.<nonce>.<ciphertext>"
//! ```
//!
//! Everyone in a room who knows the passphrase derives the same key. The
//! default passphrase is the room id itself, which only hides content from
//! the relay operator, not from anyone who knows the room name.
//!
//! # Security
//!
//! - Key bytes are zeroized on drop and never appear in `Debug` output.
//!   Log [`RoomKey::fingerprint`] instead.
//! - A failed authentication tag rejects the message; callers render a
//!   placeholder instead of the text.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod error;
pub mod key;
pub mod seal;

pub use envelope::{
    ALGORITHM_TAG, ENVELOPE_PREFIX, format_encrypted_message, is_encrypted,
    parse_encrypted_message,
};
pub use error::CryptoError;
pub use key::{KDF_ROUNDS, KEY_SIZE, RoomKey, derive_room_key};
pub use seal::{EncryptedPayload, NONCE_SIZE, TAG_SIZE, open, open_text, seal};

/// Seal `plaintext` and format it as envelope text in one step.
pub fn encrypt_text(plaintext: &str, key: &RoomKey, nonce: [u8; NONCE_SIZE]) -> String {
    format_encrypted_message(&seal(plaintext.as_bytes(), key, nonce))
}

/// Parse envelope text and open it.
///
/// # Errors
///
/// - `MalformedEnvelope`: the text does not parse as an envelope
/// - `DecryptionFailed`: wrong key or tampered ciphertext
/// - `InvalidUtf8`: plaintext is not text
pub fn decrypt_text(envelope: &str, key: &RoomKey) -> Result<String, CryptoError> {
    let payload = parse_encrypted_message(envelope).ok_or(CryptoError::MalformedEnvelope)?;
    open_text(&payload, key)
}
