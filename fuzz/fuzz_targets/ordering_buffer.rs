//! Fuzz target for the message ordering buffer
//!
//! # Strategy
//!
//! Arbitrary interleavings of session starts, inbound messages from either
//! origin, ready barriers and channel switches.
//!
//! # Invariants
//!
//! - Released timestamps are strictly increasing across the whole run
//! - Nothing is released while an initial load is in progress
//! - `inline` is true exactly for the active channel
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{MessageOrderingBuffer, Origin};
use parley_proto::ChatEvent;

#[derive(Debug, Arbitrary)]
enum Op {
    BeginLoad,
    Receive { timestamp: u16, channel: u8, replicated: bool },
    Flush,
    Switch { channel: u8 },
}

const CHANNELS: [&str; 3] = ["general", "random", "dev"];

fuzz_target!(|ops: Vec<Op>| {
    let mut buffer = MessageOrderingBuffer::new(CHANNELS[0]);
    let mut active = CHANNELS[0];
    let mut last: Option<u64> = None;

    for (i, op) in ops.into_iter().enumerate() {
        let released = match op {
            Op::BeginLoad => {
                buffer.begin_initial_load();
                Vec::new()
            }
            Op::Receive { timestamp, channel, replicated } => {
                let loading = buffer.is_initial_load();
                let message = ChatEvent {
                    id: format!("m{i}"),
                    sender: "fuzz".to_string(),
                    channel: CHANNELS[channel as usize % CHANNELS.len()].to_string(),
                    text: String::new(),
                    timestamp: u64::from(timestamp),
                    reply_to: None,
                    thread: None,
                };
                let origin = if replicated { Origin::Replicated } else { Origin::Session };
                let delivery = buffer.receive_from(origin, message);
                assert!(!(loading && delivery.is_some()));
                delivery.into_iter().collect()
            }
            Op::Flush => buffer.flush(),
            Op::Switch { channel } => {
                active = CHANNELS[channel as usize % CHANNELS.len()];
                buffer.set_active_channel(active);
                assert_eq!(buffer.unread_count(active), 0);
                Vec::new()
            }
        };

        for delivery in released {
            assert!(last.is_none_or(|seen| delivery.message.timestamp > seen));
            last = Some(delivery.message.timestamp);
            assert_eq!(delivery.inline, delivery.message.channel == active);
        }
    }

    assert_eq!(buffer.last_seen_timestamp(), last);
});
