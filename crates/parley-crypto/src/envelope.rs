//! Encrypted message envelope.
//!
//! A sealed payload travels inside the ordinary `text` field of a chat
//! message, so it must be a plain string that the server relays untouched and
//! that clients can tell apart from plaintext without decrypting.
//!
//! ```text
//! 🔒v1.xc20p.<nonce>.<ciphertext>
//!  │   │     │       └─ base64url (no padding), ≥ 16 bytes decoded
//!  │   │     └───────── base64url (no padding), exactly 24 bytes decoded
//!  │   └─────────────── algorithm tag
//!  └─────────────────── marker + format version
//! ```
//!
//! The base64url alphabet never contains `.`, so splitting on it is
//! unambiguous.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::seal::{EncryptedPayload, NONCE_SIZE, TAG_SIZE};

/// Marker every envelope starts with.
pub const ENVELOPE_PREFIX: &str = "🔒v1.";

/// Algorithm tag for `XChaCha20-Poly1305`.
pub const ALGORITHM_TAG: &str = "xc20p";

/// Whether `text` looks like an envelope.
///
/// Prefix check only; a `true` result does not mean [`parse_encrypted_message`]
/// will succeed.
pub fn is_encrypted(text: &str) -> bool {
    text.starts_with(ENVELOPE_PREFIX)
}

/// Serialize a sealed payload into envelope text.
pub fn format_encrypted_message(payload: &EncryptedPayload) -> String {
    format!(
        "{ENVELOPE_PREFIX}{ALGORITHM_TAG}.{}.{}",
        URL_SAFE_NO_PAD.encode(payload.nonce),
        URL_SAFE_NO_PAD.encode(&payload.ciphertext)
    )
}

/// Parse envelope text back into a sealed payload.
///
/// Returns `None` on any malformed input so the render path can fall back to
/// a placeholder.
pub fn parse_encrypted_message(text: &str) -> Option<EncryptedPayload> {
    let body = text.strip_prefix(ENVELOPE_PREFIX)?;

    let mut segments = body.split('.');
    let algorithm = segments.next()?;
    let nonce = segments.next()?;
    let ciphertext = segments.next()?;
    if segments.next().is_some() || algorithm != ALGORITHM_TAG {
        return None;
    }

    let nonce: [u8; NONCE_SIZE] = URL_SAFE_NO_PAD.decode(nonce).ok()?.try_into().ok()?;
    let ciphertext = URL_SAFE_NO_PAD.decode(ciphertext).ok()?;
    if ciphertext.len() < TAG_SIZE {
        return None;
    }

    Some(EncryptedPayload { nonce, ciphertext })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EncryptedPayload {
        EncryptedPayload { nonce: [7u8; NONCE_SIZE], ciphertext: vec![0xEE; 40] }
    }

    #[test]
    fn format_starts_with_marker() {
        let text = format_encrypted_message(&payload());
        assert!(text.starts_with("🔒v1.xc20p."));
        assert!(is_encrypted(&text));
        assert_eq!(text.matches('.').count(), 3);
    }

    #[test]
    fn parse_inverts_format() {
        let text = format_encrypted_message(&payload());
        assert_eq!(parse_encrypted_message(&text), Some(payload()));
    }

    #[test]
    fn plaintext_is_not_encrypted() {
        assert!(!is_encrypted("hello"));
        assert!(!is_encrypted(""));
        assert!(!is_encrypted("🔒 locked"));
        assert!(!is_encrypted("v1.xc20p.AAAA.BBBB"));
    }

    #[test]
    fn parse_rejects_malformed() {
        let good = format_encrypted_message(&payload());
        let nonce = URL_SAFE_NO_PAD.encode([7u8; NONCE_SIZE]);
        let ct = URL_SAFE_NO_PAD.encode([0xEE; 40]);

        let cases = [
            good.trim_start_matches('🔒').to_string(),
            format!("🔒v1.aes.{nonce}.{ct}"),
            format!("🔒v1.xc20p.{nonce}"),
            format!("🔒v1.xc20p.{nonce}.{ct}.extra"),
            format!("🔒v1.xc20p.{nonce}.!!!"),
            format!("🔒v1.xc20p.{}.{ct}", URL_SAFE_NO_PAD.encode([7u8; 12])),
            format!("🔒v1.xc20p.{nonce}.{}", URL_SAFE_NO_PAD.encode([1u8; 8])),
            "🔒v1.".to_string(),
        ];

        for case in cases {
            assert_eq!(parse_encrypted_message(&case), None, "accepted {case:?}");
        }
    }

    #[test]
    fn bare_tag_is_smallest_valid_ciphertext() {
        let payload = EncryptedPayload { nonce: [0u8; NONCE_SIZE], ciphertext: vec![0u8; TAG_SIZE] };
        let text = format_encrypted_message(&payload);
        assert_eq!(parse_encrypted_message(&text), Some(payload));
    }
}
