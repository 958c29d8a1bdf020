//! JSON control-channel frames.
//!
//! The control channel is a per-room WebSocket. On open the client sends a
//! single identity frame (`{"name": ...}`); the server answers with `ready`
//! once the identity is registered, and streams roster, room and message
//! events from then on.
//!
//! Server frames are tagged with a `type` field in `snake_case`. The identity
//! frame is deliberately untagged: it is the only frame a server accepts
//! before `ready`.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Identity frame sent once per session, immediately after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name for this session.
    pub name: String,
}

/// Chat message composed by this client.
///
/// `text` is either plaintext or an encrypted envelope; the server never
/// looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Client-generated message identity.
    pub id: String,
    /// Channel the message is posted to.
    pub channel: String,
    /// Plaintext or encrypted envelope.
    pub text: String,
    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Thread root, when posting inside a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Frames sent by the client on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Session identity (first and only frame before `ready`).
    Identity(Identity),
    /// Chat message.
    Message(OutboundMessage),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedClientFrame<'a> {
    Message(&'a OutboundMessage),
}

impl ClientFrame {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        let encoded = match self {
            Self::Identity(identity) => serde_json::to_string(identity),
            Self::Message(message) => serde_json::to_string(&TaggedClientFrame::Message(message)),
        };
        encoded.map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame sent by a client.
    ///
    /// Frames carrying a `type` field are tagged frames; anything else must be
    /// an identity frame.
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidControlFrame(e.to_string()))?;

        match value.get("type").and_then(serde_json::Value::as_str) {
            Some("message") => serde_json::from_value(value)
                .map(Self::Message)
                .map_err(|e| ProtocolError::InvalidControlFrame(e.to_string())),
            Some(other) => {
                Err(ProtocolError::InvalidControlFrame(format!("unknown client frame type {other}")))
            },
            None => serde_json::from_value(value)
                .map(Self::Identity)
                .map_err(|e| ProtocolError::InvalidControlFrame(e.to_string())),
        }
    }
}

/// Thread metadata attached to a root message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Number of replies in the thread.
    pub reply_count: u32,
    /// Timestamp (ms) of the latest reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_at: Option<u64>,
}

/// Chat message broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Message identity.
    pub id: String,
    /// Display name of the sender.
    pub sender: String,
    /// Channel the message belongs to.
    pub channel: String,
    /// Plaintext or encrypted envelope.
    pub text: String,
    /// Server timestamp in milliseconds.
    pub timestamp: u64,
    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Thread summary when this message is a thread root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadSummary>,
}

/// Frames sent by the server on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Server-side error report.
    Error {
        /// Human-readable description.
        message: String,
    },

    /// Identity registered; backlog replay is complete.
    Ready,

    /// Someone joined the room.
    Joined {
        /// Display name of the member.
        name: String,
    },

    /// Someone left the room.
    Quit {
        /// Display name of the member.
        name: String,
    },

    /// Room metadata update.
    RoomInfo {
        /// Channels known to the room.
        #[serde(default)]
        channels: Vec<String>,
        /// Members currently online.
        #[serde(default)]
        members: Vec<String>,
        /// Room topic, if set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },

    /// Room is scheduled for destruction.
    DestructionScheduled {
        /// Destruction time (ms since epoch).
        at: u64,
    },

    /// A scheduled destruction was cancelled.
    DestructionCancelled,

    /// Room was destroyed.
    Destroyed,

    /// Message pin state changed.
    PinUpdate {
        /// Channel of the pinned message.
        channel: String,
        /// Pinned message identity.
        message_id: String,
        /// New pin state.
        pinned: bool,
    },

    /// Chat message broadcast.
    Message(ChatEvent),
}

impl ServerFrame {
    /// Parse a JSON text frame sent by the server.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidControlFrame(e.to_string()))
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Frame type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Ready => "ready",
            Self::Joined { .. } => "joined",
            Self::Quit { .. } => "quit",
            Self::RoomInfo { .. } => "room_info",
            Self::DestructionScheduled { .. } => "destruction_scheduled",
            Self::DestructionCancelled => "destruction_cancelled",
            Self::Destroyed => "destroyed",
            Self::PinUpdate { .. } => "pin_update",
            Self::Message(_) => "message",
        }
    }
}
