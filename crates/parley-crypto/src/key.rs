//! Room key derivation.
//!
//! A room key is stretched from a user-supplied passphrase with
//! PBKDF2-HMAC-SHA256, salted with the room identifier so the same passphrase
//! yields unrelated keys in different rooms. Derivation is deliberately slow;
//! callers on a latency-sensitive path should run it off the event loop.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of a room key in bytes.
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count.
pub const KDF_ROUNDS: u32 = 100_000;

/// Salt prefix for room key derivation (domain separation).
const KDF_SALT_LABEL: &[u8] = b"parley room key v1";

/// HKDF info label for key fingerprints.
const FINGERPRINT_LABEL: &[u8] = b"parley key fingerprint";

/// Symmetric key for one room.
///
/// Key bytes are zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey {
    bytes: [u8; KEY_SIZE],
}

impl RoomKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Rebuild a key from persisted bytes.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if `bytes` is not 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self { bytes })
    }

    /// Raw key bytes, for persistence and the AEAD.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Short, non-reversible identifier for this key (16 hex chars).
    ///
    /// Safe to log and display; two peers holding the same key see the same
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        let hkdf = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut out = [0u8; 8];
        let Ok(()) = hkdf.expand(FINGERPRINT_LABEL, &mut out) else {
            unreachable!("8 bytes is a valid HKDF-SHA256 output length");
        };
        hex::encode(out)
    }
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomKey").field("fingerprint", &self.fingerprint()).finish()
    }
}

impl Drop for RoomKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Derive the symmetric key for `room_id` from `passphrase`.
///
/// Deterministic: the same `(room_id, passphrase)` pair always produces the
/// same key, which is how members of a room agree on it out of band.
pub fn derive_room_key(room_id: &str, passphrase: &str) -> RoomKey {
    let mut salt = Vec::with_capacity(KDF_SALT_LABEL.len() + room_id.len());
    salt.extend_from_slice(KDF_SALT_LABEL);
    salt.extend_from_slice(room_id.as_bytes());

    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, KDF_ROUNDS, &mut bytes);

    let key = RoomKey::new(bytes);
    bytes.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = derive_room_key("general", "secret");
        let b = derive_room_key("general", "secret");
        assert_eq!(a, b, "same inputs must produce same key");
    }

    #[test]
    fn room_id_salts_the_key() {
        let a = derive_room_key("general", "secret");
        let b = derive_room_key("random", "secret");
        assert_ne!(a, b, "different rooms must produce different keys");
    }

    #[test]
    fn different_passphrases_produce_different_keys() {
        let a = derive_room_key("general", "secret");
        let b = derive_room_key("general", "Secret");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_passphrase_still_derives() {
        let key = derive_room_key("general", "");
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(matches!(RoomKey::from_slice(&[0u8; 31]), Err(CryptoError::InvalidKeyLength(31))));
        let key = RoomKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let key = RoomKey::new([1u8; 32]);
        let fp = key.fingerprint();
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, RoomKey::new([1u8; 32]).fingerprint());
        assert_ne!(fp, RoomKey::new([2u8; 32]).fingerprint());
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = RoomKey::new([0xAB; 32]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("171"));
        assert!(!rendered.to_lowercase().contains("abab"));
        assert!(rendered.contains(&key.fingerprint()));
    }
}
