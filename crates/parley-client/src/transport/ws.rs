//! WebSocket transport over tokio-tungstenite.

use futures::{SinkExt, StreamExt};
use parley_proto::{CloseInfo, close};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{Connector, Link, LinkEnds, Outgoing, TransportEvent};
use crate::error::TransportError;

/// Close frame without a status code.
const NO_STATUS: u16 = 1005;

/// Connects over `ws://` / `wss://`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> Link {
        let (link, ends) = Link::pair();
        tokio::spawn(run_socket(url.to_string(), ends));
        link
    }
}

/// Bridge one socket to its link until either side goes away.
async fn run_socket(url: String, ends: LinkEnds) {
    let LinkEnds { mut outgoing, events } = ends;

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let err = TransportError::Connect(e.to_string());
            warn!(url = %url, error = %err, "websocket connect failed");
            let _ = events.send(TransportEvent::Closed(CloseInfo::abnormal(err.to_string())));
            return;
        },
    };

    debug!(url = %url, "websocket open");
    let _ = events.send(TransportEvent::Open);
    let (mut sink, mut stream) = stream.split();

    let close = loop {
        tokio::select! {
            queued = outgoing.recv() => {
                let message = match queued {
                    Some(Outgoing::Text(text)) => Message::Text(text.into()),
                    Some(Outgoing::Binary(bytes)) => Message::Binary(bytes.into()),
                    None => {
                        // Owner dropped the link
                        let _ = sink.send(Message::Close(None)).await;
                        break CloseInfo::new(close::NORMAL, "closed by client");
                    },
                };
                if let Err(e) = sink.send(message).await {
                    break CloseInfo::abnormal(e.to_string());
                }
            },
            received = stream.next() => match received {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Text(text.to_string()));
                },
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.send(TransportEvent::Binary(bytes.to_vec()));
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || CloseInfo::new(NO_STATUS, ""),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.to_string()),
                    );
                },
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {},
                Some(Err(e)) => break CloseInfo::abnormal(e.to_string()),
                None => break CloseInfo::abnormal("stream ended"),
            },
        }
    };

    debug!(url = %url, code = close.code, reason = %close.reason, "websocket closed");
    let _ = events.send(TransportEvent::Closed(close));
}
