//! Fuzz target for the encrypted-envelope codec
//!
//! # Strategy
//!
//! - Raw text: arbitrary strings, with and without the envelope prefix
//! - Mangled envelope: a valid envelope with one byte flipped or truncated
//!
//! # Invariants
//!
//! - Parsing and decrypting NEVER panic
//! - A parsed envelope formats back to the same text
//! - A mangled envelope never decrypts to the original plaintext unless the
//!   mangling left it unchanged

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_crypto::{
    ENVELOPE_PREFIX, RoomKey, decrypt_text, encrypt_text, format_encrypted_message,
    parse_encrypted_message,
};

#[derive(Debug, Arbitrary)]
enum Input {
    Raw { text: String, prefixed: bool },
    Mangled { plaintext: String, nonce: [u8; 24], position: usize, replacement: char, truncate: bool },
}

fuzz_target!(|input: Input| {
    let key = RoomKey::new([7; 32]);

    match input {
        Input::Raw { text, prefixed } => {
            let text = if prefixed { format!("{ENVELOPE_PREFIX}{text}") } else { text };
            if let Some(payload) = parse_encrypted_message(&text) {
                assert_eq!(format_encrypted_message(&payload), text);
            }
            let _ = decrypt_text(&text, &key);
        }

        Input::Mangled { plaintext, nonce, position, replacement, truncate } => {
            let envelope = encrypt_text(&plaintext, &key, nonce);
            let mut chars: Vec<char> = envelope.chars().collect();
            let at = position % chars.len();
            if truncate {
                chars.truncate(at);
            } else {
                chars[at] = replacement;
            }
            let mangled: String = chars.into_iter().collect();

            if mangled != envelope {
                if let Ok(opened) = decrypt_text(&mangled, &key) {
                    // Only a change the base64 decoder ignores can still open
                    assert_eq!(opened, plaintext);
                }
            }
        }
    }
});
