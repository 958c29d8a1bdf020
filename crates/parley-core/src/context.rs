//! Current room, channel and thread.
//!
//! One explicit value object instead of ambient globals. The handle wraps a
//! `tokio::sync::watch` channel so any component can read the current value
//! or subscribe to changes.

use tokio::sync::watch;

/// Where the user currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Room id
    pub room: String,
    /// Active channel
    pub channel: String,
    /// Open thread root, if any
    pub thread: Option<String>,
}

impl SessionContext {
    /// Context for `channel` of `room`, no thread open.
    pub fn new(room: impl Into<String>, channel: impl Into<String>) -> Self {
        Self { room: room.into(), channel: channel.into(), thread: None }
    }
}

/// Shared, observable [`SessionContext`].
///
/// Clones observe and update the same context.
#[derive(Debug, Clone)]
pub struct SessionContextHandle {
    tx: watch::Sender<SessionContext>,
}

impl SessionContextHandle {
    /// Create a handle holding `context`.
    pub fn new(context: SessionContext) -> Self {
        Self { tx: watch::Sender::new(context) }
    }

    /// Snapshot of the current context.
    pub fn get(&self) -> SessionContext {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionContext> {
        self.tx.subscribe()
    }

    /// Switch channel. Closes any open thread. Returns `false` if unchanged.
    pub fn set_channel(&self, channel: &str) -> bool {
        self.tx.send_if_modified(|ctx| {
            if ctx.channel == channel && ctx.thread.is_none() {
                return false;
            }
            ctx.channel = channel.to_string();
            ctx.thread = None;
            true
        })
    }

    /// Open or close a thread in the current channel.
    pub fn set_thread(&self, thread: Option<String>) -> bool {
        self.tx.send_if_modified(|ctx| {
            if ctx.thread == thread {
                return false;
            }
            ctx.thread = thread;
            true
        })
    }
}
