//! Presentation callbacks.
//!
//! The runtime calls these from its event loop, so implementations should
//! return quickly. All rendering lives behind this trait.

use parley_core::{ConnectionStatus, RoomEvent};
use parley_proto::ThreadSummary;

/// Shown instead of an encrypted message when no room key is available.
pub const ENCRYPTED_PLACEHOLDER: &str = "[encrypted message]";

/// Shown when the room key does not open a message or the worker failed.
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "[unable to decrypt message]";

/// Shown when an encrypted message's envelope does not parse.
pub const UNREADABLE_PLACEHOLDER: &str = "[unreadable encrypted message]";

/// A message ready for display, already decrypted or replaced by a
/// placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Message identity
    pub id: String,
    /// Display name of the sender
    pub sender: String,
    /// Channel of the message
    pub channel: String,
    /// Display text
    pub text: String,
    /// Server timestamp (ms)
    pub timestamp: u64,
    /// Message this one replies to
    pub reply_to: Option<String>,
    /// Thread summary when this message is a thread root
    pub thread: Option<ThreadSummary>,
    /// Whether the message belongs to the active channel. If not it only
    /// counts towards that channel's unread badge.
    pub inline: bool,
}

/// Receives everything the user should see.
pub trait Presenter: Send + 'static {
    /// Connection status badge changed.
    fn on_connection_status_change(&mut self, status: ConnectionStatus);

    /// A message is ready, in delivery order.
    fn on_message_ready(&mut self, message: MessageSummary);

    /// The backlog of the current session has been delivered.
    fn on_ready_barrier_crossed(&mut self);

    /// One-line system notice.
    fn on_notice(&mut self, _notice: &str) {}

    /// Roster, room info, pin or destruction event.
    fn on_room_event(&mut self, _event: &RoomEvent) {}
}
