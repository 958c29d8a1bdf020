//! In-process transport.
//!
//! Every `connect` hands the remote end of the link to whoever holds the
//! connector's peer receiver, which plays the server. Used by tests and for
//! embedding the client next to an in-process relay.

use parley_proto::{CloseInfo, ServerFrame, SyncMessage};
use tokio::sync::mpsc;

use super::{Connector, Link, LinkEnds, Outgoing, TransportEvent};

/// Connector whose links end in [`MemoryPeer`]s.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its accepted peers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (Self { peers }, accepted)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> Link {
        let (link, ends) = Link::pair();
        let peer = MemoryPeer { url: url.to_string(), ends };
        if let Err(mpsc::error::SendError(peer)) = self.peers.send(peer) {
            // Nobody is accepting: the connection is refused
            let _ = peer.ends.events.send(TransportEvent::Closed(CloseInfo::abnormal("connection refused")));
        }
        link
    }
}

/// Remote end of an in-process link.
///
/// The link does not open until [`MemoryPeer::open`] is called. Dropping the
/// peer without closing ends the client's event stream.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    ends: LinkEnds,
}

impl MemoryPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Complete the handshake.
    pub fn open(&self) {
        let _ = self.ends.events.send(TransportEvent::Open);
    }

    /// Send a control frame to the client.
    pub fn send_frame(&self, frame: &ServerFrame) {
        if let Ok(text) = frame.encode() {
            self.send_text(text);
        }
    }

    /// Send a sync message to the client.
    pub fn send_sync(&self, message: &SyncMessage) {
        if let Ok(bytes) = message.encode() {
            let _ = self.ends.events.send(TransportEvent::Binary(bytes));
        }
    }

    /// Send a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.ends.events.send(TransportEvent::Text(text.into()));
    }

    /// Close the link with `close`.
    pub fn close(&self, close: CloseInfo) {
        let _ = self.ends.events.send(TransportEvent::Closed(close));
    }

    /// Next frame sent by the client. `None` once the client dropped the link.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.ends.outgoing.recv().await
    }

    /// Next text frame sent by the client, skipping binary frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Outgoing::Text(text) => return Some(text),
                Outgoing::Binary(_) => {},
            }
        }
    }

    /// Next sync message sent by the client, skipping text frames and
    /// undecodable binary frames.
    pub async fn recv_sync(&mut self) -> Option<SyncMessage> {
        loop {
            if let Outgoing::Binary(bytes) = self.recv().await?
                && let Ok(message) = SyncMessage::decode(&bytes)
            {
                return Some(message);
            }
        }
    }

    /// Frame already queued by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.ends.outgoing.try_recv().ok()
    }

    /// Whether the client dropped its end of the link.
    pub fn is_closed_by_client(&self) -> bool {
        self.ends.outgoing.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut link = connector.connect("mem://room");
        let mut peer = accepted.recv().await.unwrap();
        assert_eq!(peer.url(), "mem://room");

        peer.open();
        assert_eq!(link.events.recv().await, Some(TransportEvent::Open));

        link.sender.send_text("hi".to_string()).unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hi"));

        peer.send_frame(&ServerFrame::Ready);
        assert!(matches!(link.events.recv().await, Some(TransportEvent::Text(t)) if t.contains("ready")));
    }

    #[tokio::test]
    async fn dropping_link_is_visible_to_peer() {
        let (connector, mut accepted) = MemoryConnector::new();
        let link = connector.connect("mem://room");
        let mut peer = accepted.recv().await.unwrap();

        drop(link);
        assert!(peer.recv().await.is_none());
        assert!(peer.is_closed_by_client());
    }

    #[tokio::test]
    async fn refused_without_acceptor() {
        let (connector, accepted) = MemoryConnector::new();
        drop(accepted);

        let mut link = connector.connect("mem://room");
        assert!(matches!(link.events.recv().await, Some(TransportEvent::Closed(_))));
    }
}
