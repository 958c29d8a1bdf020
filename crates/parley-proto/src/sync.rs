//! CBOR sync-relay messages.
//!
//! The replicated store talks to the relay over its own WebSocket using
//! binary frames. Every unit of replicated state is a [`CellRecord`]: one
//! `(table, row, column)` value stamped with a hybrid logical clock.
//!
//! # Protocol
//!
//! ```text
//! client                          relay
//!   │── Hello {room, node} ────────>│
//!   │── Load ──────────────────────>│
//!   │<──────────── Snapshot {cells} ─│
//!   │── Save {cells} ──────────────>│   full local state
//!   │<────────────── Delta {cells} ──│   live, both directions
//!   │── Delta {cells} ─────────────>│
//! ```
//!
//! The load-then-save exchange runs on every (re)connection so an offline
//! client catches up without relying on deltas lost during the outage.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Hybrid logical clock stamp.
///
/// Ordering is lexicographic over `(millis, counter, node)`; the derived
/// `Ord` relies on field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Physical component (ms since epoch).
    pub millis: u64,
    /// Logical counter within the same millisecond.
    pub counter: u32,
    /// Writer node, breaks exact ties.
    pub node: u64,
}

impl Stamp {
    /// Smallest possible stamp.
    pub const ZERO: Self = Self { millis: 0, counter: 0, node: 0 };
}

/// Replicated cell value.
///
/// The derived `Ord` only matters for two writes carrying the same stamp,
/// which a well-behaved cluster never produces; it keeps merge deterministic
/// anyway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CellValue {
    /// Cleared cell.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
}

impl CellValue {
    /// Text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer content, if this is an integer cell.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean cell.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One stamped cell of replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    /// Table name (`messages`, `channels`, ...).
    pub table: String,
    /// Stable row identifier.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Cell value.
    pub value: CellValue,
    /// Write stamp; the greater stamp wins.
    pub stamp: Stamp,
}

/// Messages exchanged with the sync relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Announce room and node on connect.
    Hello {
        /// Room being synchronized.
        room: String,
        /// Writer node of this client.
        node: u64,
    },
    /// Ask for the relay's full state.
    Load,
    /// Relay's full state, in answer to [`SyncMessage::Load`].
    Snapshot {
        /// Every cell the relay holds.
        cells: Vec<CellRecord>,
    },
    /// Client's full state, sent after merging a snapshot.
    Save {
        /// Every cell the client holds.
        cells: Vec<CellRecord>,
    },
    /// Incremental change.
    Delta {
        /// Changed cells.
        cells: Vec<CellRecord>,
    },
}

impl SyncMessage {
    /// Encode as a CBOR binary frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a CBOR binary frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::InvalidSyncFrame(e.to_string()))
    }

    /// Number of cells carried by this message.
    pub fn cell_count(&self) -> usize {
        match self {
            Self::Hello { .. } | Self::Load => 0,
            Self::Snapshot { cells } | Self::Save { cells } | Self::Delta { cells } => cells.len(),
        }
    }
}
