//! Property-based tests for the encrypted envelope codec
//!
//! The envelope is the only thing distinguishing ciphertext from plaintext on
//! the wire, so the codec must round-trip exactly and the marker check must
//! never misclassify ordinary text.

use parley_crypto::{
    EncryptedPayload, ENVELOPE_PREFIX, NONCE_SIZE, RoomKey, TAG_SIZE, decrypt_text, encrypt_text,
    format_encrypted_message, is_encrypted, parse_encrypted_message,
};
use proptest::prelude::*;

fn arb_payload() -> impl Strategy<Value = EncryptedPayload> {
    (any::<[u8; NONCE_SIZE]>(), prop::collection::vec(any::<u8>(), TAG_SIZE..512))
        .prop_map(|(nonce, ciphertext)| EncryptedPayload { nonce, ciphertext })
}

proptest! {
    #[test]
    fn parse_inverts_format(payload in arb_payload()) {
        let text = format_encrypted_message(&payload);
        prop_assert_eq!(parse_encrypted_message(&text), Some(payload));
    }

    #[test]
    fn formatted_text_is_always_encrypted(payload in arb_payload()) {
        prop_assert!(is_encrypted(&format_encrypted_message(&payload)));
    }

    #[test]
    fn plaintext_is_never_encrypted(text in "\\PC*") {
        prop_assume!(!text.starts_with(ENVELOPE_PREFIX));
        prop_assert!(!is_encrypted(&text));
        prop_assert_eq!(parse_encrypted_message(&text), None);
    }

    #[test]
    fn parse_never_panics_after_prefix(rest in ".*") {
        let _ = parse_encrypted_message(&format!("{ENVELOPE_PREFIX}{rest}"));
    }

    #[test]
    fn text_roundtrips_through_envelope(
        text in "\\PC{0,200}",
        key in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    ) {
        let key = RoomKey::new(key);
        let envelope = encrypt_text(&text, &key, nonce);
        prop_assert!(is_encrypted(&envelope));
        prop_assert_eq!(decrypt_text(&envelope, &key).unwrap(), text);
    }
}
