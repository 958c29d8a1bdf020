//! Message sealing using `XChaCha20-Poly1305`
//!
//! All functions are pure - the nonce must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, key::RoomKey};

/// `XChaCha20` nonce size (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// A sealed payload: nonce plus authenticated ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Seal `plaintext` under `key`.
///
/// # Security
///
/// Caller MUST provide a fresh random nonce per message. With 192-bit nonces
/// random generation is collision-safe for any realistic message volume.
pub fn seal(plaintext: &[u8], key: &RoomKey, nonce: [u8; NONCE_SIZE]) -> EncryptedPayload {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    EncryptedPayload { nonce, ciphertext }
}

/// Open a sealed payload.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key or tampered ciphertext
pub fn open(payload: &EncryptedPayload, key: &RoomKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(&payload.nonce);

    cipher.decrypt(nonce, payload.ciphertext.as_slice()).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

/// Open a sealed payload and interpret it as UTF-8 text.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key or tampered ciphertext
/// - `InvalidUtf8`: authenticated plaintext is not text
pub fn open_text(payload: &EncryptedPayload, key: &RoomKey) -> Result<String, CryptoError> {
    let bytes = open(payload, key)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
}
