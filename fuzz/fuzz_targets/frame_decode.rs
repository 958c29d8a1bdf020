//! Fuzz target for control and sync frame decoding
//!
//! # Strategy
//!
//! - Random text as a server control frame (JSON)
//! - Random bytes as a sync relay message (CBOR), including nested and
//!   huge-length prefixes
//!
//! # Invariants
//!
//! - Decoding NEVER panics and never allocates the claimed length up front
//! - Whatever decodes re-encodes and decodes to the same value

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_proto::{ServerFrame, SyncMessage};

#[derive(Debug, Arbitrary)]
enum Input {
    Control(String),
    Sync(Vec<u8>),
    Nested { depth: u8 },
    HugeLength { exponent: u8 },
}

fuzz_target!(|input: Input| {
    match input {
        Input::Control(text) => {
            if let Ok(frame) = ServerFrame::decode(&text) {
                let encoded = frame.encode().expect("decoded frame encodes");
                assert_eq!(ServerFrame::decode(&encoded).ok(), Some(frame));
            }
        }
        Input::Sync(bytes) => check_sync(&bytes),
        Input::Nested { depth } => {
            let mut bytes = vec![0x81; usize::from(depth % 64)];
            bytes.push(0x01);
            check_sync(&bytes);
        }
        Input::HugeLength { exponent } => {
            let claimed = 1u32 << (exponent % 32);
            for major in [0x5A, 0x7A, 0x9A, 0xBA] {
                let mut bytes = vec![major];
                bytes.extend_from_slice(&claimed.to_be_bytes());
                check_sync(&bytes);
            }
        }
    }
});

fn check_sync(bytes: &[u8]) {
    if let Ok(message) = SyncMessage::decode(bytes) {
        let encoded = message.encode().expect("decoded message encodes");
        assert_eq!(SyncMessage::decode(&encoded).ok(), Some(message));
    }
}
