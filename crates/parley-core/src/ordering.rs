//! Inbound message ordering around the `ready` barrier.
//!
//! On join the server replays recent history and then sends `ready`. Replayed
//! messages may arrive in any order, so until `ready` they are only
//! collected. The flush at `ready` sorts them by timestamp and releases each
//! one newer than anything already delivered. After the flush, messages are
//! released as they arrive, subject to the same rule.
//!
//! The high-water mark survives reconnects, so a backlog replayed on rejoin
//! does not deliver anything twice.
//!
//! Rows from the replicated store are reported once, when they are merged or
//! restored. A new session does not replay them, so they stay pending across
//! session changes until a barrier releases them.

use std::collections::HashMap;

use parley_proto::ChatEvent;
use tracing::{debug, trace};

/// Where an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Control session: live traffic or the join backlog
    Session,
    /// Replicated store: restored on startup or merged from the relay
    Replicated,
}

/// A message released by the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The message
    pub message: ChatEvent,
    /// Whether it belongs to the active channel (render inline) or only
    /// counts towards its channel's unread badge
    pub inline: bool,
}

/// Buffers inbound messages until the `ready` barrier, then releases them in
/// timestamp order without duplicates.
#[derive(Debug, Clone)]
pub struct MessageOrderingBuffer {
    initial_load: bool,
    pending: Vec<(Origin, ChatEvent)>,
    last_seen: Option<u64>,
    active_channel: String,
    unread: HashMap<String, u32>,
}

impl MessageOrderingBuffer {
    /// Create a buffer with `active_channel` selected.
    ///
    /// Starts in initial-load mode.
    pub fn new(active_channel: impl Into<String>) -> Self {
        Self {
            initial_load: true,
            pending: Vec::new(),
            last_seen: None,
            active_channel: active_channel.into(),
            unread: HashMap::new(),
        }
    }

    /// Whether messages are being collected rather than released.
    pub fn is_initial_load(&self) -> bool {
        self.initial_load
    }

    /// Highest timestamp delivered so far.
    pub fn last_seen_timestamp(&self) -> Option<u64> {
        self.last_seen
    }

    /// Number of messages waiting for the barrier.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Channel whose messages render inline.
    pub fn active_channel(&self) -> &str {
        &self.active_channel
    }

    /// Enter initial-load mode for a new session.
    ///
    /// Session backlog still pending from an abandoned session is dropped;
    /// the new session replays it. Pending replicated rows are kept.
    pub fn begin_initial_load(&mut self) {
        let before = self.pending.len();
        self.pending.retain(|(origin, _)| *origin == Origin::Replicated);
        if self.pending.len() < before {
            debug!(dropped = before - self.pending.len(), "discarding backlog of abandoned session");
        }
        self.initial_load = true;
    }

    /// Accept one message from the control session.
    ///
    /// Returns the delivery if the message is released right away.
    pub fn receive(&mut self, message: ChatEvent) -> Option<Delivery> {
        self.receive_from(Origin::Session, message)
    }

    /// Accept one inbound message from `origin`.
    pub fn receive_from(&mut self, origin: Origin, message: ChatEvent) -> Option<Delivery> {
        if self.initial_load {
            trace!(id = %message.id, timestamp = message.timestamp, ?origin, "buffering before ready");
            self.pending.push((origin, message));
            return None;
        }
        self.apply(message)
    }

    /// Cross the `ready` barrier: release pending messages in timestamp order.
    ///
    /// Calling it outside initial-load mode releases nothing.
    pub fn flush(&mut self) -> Vec<Delivery> {
        if !self.initial_load {
            return Vec::new();
        }

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|(_, m)| m.timestamp);
        self.initial_load = false;

        let deliveries: Vec<Delivery> = pending.into_iter().filter_map(|(_, m)| self.apply(m)).collect();
        debug!(delivered = deliveries.len(), last_seen = ?self.last_seen, "ready barrier flushed");
        deliveries
    }

    /// Switch the active channel, clearing its unread count.
    pub fn set_active_channel(&mut self, channel: impl Into<String>) {
        let channel = channel.into();
        self.unread.remove(&channel);
        self.active_channel = channel;
    }

    /// Unread count for `channel`.
    pub fn unread_count(&self, channel: &str) -> u32 {
        self.unread.get(channel).copied().unwrap_or(0)
    }

    /// Unread counts of every channel with unread messages.
    pub fn unread_counts(&self) -> &HashMap<String, u32> {
        &self.unread
    }

    fn apply(&mut self, message: ChatEvent) -> Option<Delivery> {
        if self.last_seen.is_some_and(|seen| message.timestamp <= seen) {
            trace!(id = %message.id, timestamp = message.timestamp, "discarding already-seen message");
            return None;
        }
        self.last_seen = Some(message.timestamp);

        let inline = message.channel == self.active_channel;
        if !inline {
            *self.unread.entry(message.channel.clone()).or_insert(0) += 1;
        }
        Some(Delivery { message, inline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, channel: &str, timestamp: u64) -> ChatEvent {
        ChatEvent {
            id: id.to_string(),
            sender: "bob".to_string(),
            channel: channel.to_string(),
            text: format!("message {id}"),
            timestamp,
            reply_to: None,
            thread: None,
        }
    }

    fn timestamps(deliveries: &[Delivery]) -> Vec<u64> {
        deliveries.iter().map(|d| d.message.timestamp).collect()
    }

    #[test]
    fn buffers_until_ready_then_sorts() {
        let mut buffer = MessageOrderingBuffer::new("general");
        for ts in [5, 1, 3, 2, 4] {
            assert!(buffer.receive(msg(&ts.to_string(), "general", ts)).is_none());
        }
        assert_eq!(buffer.pending_len(), 5);

        let released = buffer.flush();
        assert_eq!(timestamps(&released), vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.last_seen_timestamp(), Some(5));
        assert!(!buffer.is_initial_load());

        assert!(buffer.receive(msg("late", "general", 3)).is_none());
    }

    #[test]
    fn three_pending_render_in_order() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive(msg("a", "general", 100));
        buffer.receive(msg("c", "general", 300));
        buffer.receive(msg("b", "general", 200));

        assert_eq!(timestamps(&buffer.flush()), vec![100, 200, 300]);
        assert_eq!(buffer.last_seen_timestamp(), Some(300));
    }

    #[test]
    fn after_ready_messages_release_immediately() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.flush();

        let delivery = buffer.receive(msg("a", "general", 10)).unwrap();
        assert!(delivery.inline);
        assert!(buffer.receive(msg("a", "general", 10)).is_none());
        assert!(buffer.receive(msg("b", "general", 11)).is_some());
    }

    #[test]
    fn duplicates_in_backlog_are_dropped() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive(msg("a", "general", 7));
        buffer.receive(msg("a", "general", 7));
        assert_eq!(buffer.flush().len(), 1);
    }

    #[test]
    fn replayed_backlog_after_rejoin_is_deduplicated() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive(msg("a", "general", 1));
        buffer.receive(msg("b", "general", 2));
        buffer.flush();

        buffer.begin_initial_load();
        buffer.receive(msg("b", "general", 2));
        buffer.receive(msg("c", "general", 3));
        buffer.receive(msg("a", "general", 1));

        assert_eq!(timestamps(&buffer.flush()), vec![3]);
    }

    #[test]
    fn other_channels_count_as_unread() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive(msg("a", "random", 1));
        buffer.receive(msg("b", "general", 2));
        buffer.receive(msg("c", "random", 3));

        let released = buffer.flush();
        assert_eq!(released.iter().filter(|d| d.inline).count(), 1);
        assert_eq!(buffer.unread_count("random"), 2);
        assert_eq!(buffer.unread_count("general"), 0);

        buffer.set_active_channel("random");
        assert_eq!(buffer.unread_count("random"), 0);
        assert!(buffer.receive(msg("d", "random", 4)).unwrap().inline);
    }

    #[test]
    fn flush_outside_initial_load_is_noop() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.flush();
        assert!(buffer.flush().is_empty());
    }

    #[test]
    fn new_session_drops_abandoned_backlog() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive(msg("a", "general", 1));
        buffer.begin_initial_load();
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn replicated_rows_survive_session_changes() {
        let mut buffer = MessageOrderingBuffer::new("general");
        buffer.receive_from(Origin::Replicated, msg("r", "general", 5));
        buffer.receive(msg("abandoned", "general", 9));

        // First join, then a replacement session before ready
        buffer.begin_initial_load();
        buffer.begin_initial_load();
        assert_eq!(buffer.pending_len(), 1);

        buffer.receive(msg("a", "general", 3));
        let released = buffer.flush();
        assert_eq!(timestamps(&released), vec![3, 5]);
        assert_eq!(released[1].message.id, "r");
    }
}
