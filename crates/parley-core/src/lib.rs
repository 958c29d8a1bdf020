//! Parley client core
//!
//! Sans-IO state machines for a room chat client: every type here takes the
//! current time and inputs, mutates its own state, and returns actions for a
//! driver to execute. Nothing in this crate opens a socket, spawns a task or
//! sleeps.
//!
//! # Components
//!
//! - [`ConnectionManager`]: control-channel session lifecycle, `ready`
//!   barrier, close classification, reconnect floor
//! - [`MessageOrderingBuffer`]: holds messages until `ready`, releases them in
//!   timestamp order without duplicates
//! - [`ReplicatedStore`] + [`SyncSession`]: mergeable tables synchronized with
//!   a relay
//! - [`KeyManager`]: per-room key derivation and persistence
//! - [`SessionContextHandle`]: current room, channel and thread
//! - [`Storage`]: durable local storage seam
//!
//! # Data Flow
//!
//! ```text
//! join ──> ConnectionManager ──> OpenTransport / SendFrame(identity)
//!                 │
//!        Inbound  │  ReadyBarrier
//!                 ↓
//!        MessageOrderingBuffer ──> Delivery (in order, once)
//!
//! local write ──> ReplicatedStore ──(persist)──> SyncSession ──> Delta
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod context;
pub mod env;
pub mod error;
pub mod keys;
pub mod ordering;
pub mod storage;
pub mod store;

pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus,
    RejoinTicket, RoomEvent, Session, SessionId,
};
pub use context::{SessionContext, SessionContextHandle};
pub use env::Environment;
pub use error::{ConnectionError, KeyStorageError, StorageError, StoreError};
pub use keys::KeyManager;
pub use ordering::{Delivery, MessageOrderingBuffer, Origin};
pub use storage::{ChaoticStorage, MemoryStorage, Storage};
pub use store::{ReplicatedStore, RowChange, SyncAction, SyncSession, SyncState, Table};
