//! Message transports.
//!
//! A [`Connector`] turns a URL into a [`Link`]: a pair of channels bridged to
//! the socket by a background task. This is a thin layer that only moves
//! frames; protocol logic stays in the Sans-IO state machines of
//! `parley_core`.
//!
//! # Link lifecycle
//!
//! ```text
//! connect ──> [Open] ──> Text / Binary ... ──> Closed(CloseInfo)
//!    │
//!    └──────────────────────────────────────> Closed(1006) on failed open
//! ```
//!
//! Every link ends with exactly one `Closed` event. Dropping the link's
//! sender closes the socket.

mod memory;
mod ws;

pub use memory::{MemoryConnector, MemoryPeer};
use parley_proto::CloseInfo;
use tokio::sync::mpsc;
pub use ws::WsConnector;

use crate::error::TransportError;

/// Event delivered by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake complete; frames may be sent.
    Open,
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Link closed. Always the last event.
    Closed(CloseInfo),
}

/// Frame queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Sending half of a link.
///
/// Dropping every clone closes the socket.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl LinkSender {
    /// Queue a text frame.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(Outgoing::Text(text)).map_err(|_| TransportError::Closed)
    }

    /// Queue a binary frame.
    pub fn send_binary(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(Outgoing::Binary(bytes)).map_err(|_| TransportError::Closed)
    }
}

/// One connection attempt.
#[derive(Debug)]
pub struct Link {
    /// Frames to the remote end.
    pub sender: LinkSender,
    /// Events from the remote end.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    /// Create a link and the ends its I/O task holds.
    pub fn pair() -> (Self, LinkEnds) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = Self { sender: LinkSender { tx: out_tx }, events: event_rx };
        (link, LinkEnds { outgoing: out_rx, events: event_tx })
    }
}

/// The I/O task's side of a [`Link`].
#[derive(Debug)]
pub struct LinkEnds {
    /// Frames queued by the owner of the link. `None` once it is dropped.
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
    /// Events for the owner of the link.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Opens links.
///
/// Must be called from within a tokio runtime; implementations spawn the
/// I/O task and return immediately. Opening may take arbitrarily long and is
/// reported through [`TransportEvent::Open`].
pub trait Connector: Clone + Send + Sync + 'static {
    /// Start connecting to `url`.
    fn connect(&self, url: &str) -> Link;
}
