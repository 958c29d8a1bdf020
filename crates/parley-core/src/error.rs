//! Error types for the parley core.
//!
//! Strongly-typed errors per layer: connection lifecycle, durable storage,
//! key storage and the replicated store. Every error here is caught at an
//! operation boundary by the runtime and turned into a log line, a notice or
//! a placeholder; none of them tear down the client.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from connection state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: ConnectionState,
        /// What the caller tried to do
        operation: String,
    },

    /// No identity is set, so no session can be started
    #[error("no identity set")]
    NoIdentity,

    /// Protocol error from frame parsing/encoding
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Whether the reconnect policy should try again.
    ///
    /// Transport failures are retried by the reconnect policy. A missing
    /// identity or a protocol violation will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<parley_proto::ProtocolError> for ConnectionError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors from durable local storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying I/O or database failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Errors from the key manager.
///
/// Callers treat every variant as "encryption unavailable" for the room.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStorageError {
    /// Storage layer failed
    #[error("key storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Persisted key material is unreadable
    #[error("stored key material is corrupt: {0}")]
    Corrupt(String),
}

/// Errors from the replicated store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Local persistence failed; the write was not applied
    #[error("store persistence failed: {0}")]
    Storage(#[from] StorageError),

    /// Sync frame could not be encoded or decoded
    #[error("sync protocol error: {0}")]
    Protocol(String),
}

impl From<parley_proto::ProtocolError> for StoreError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        assert!(ConnectionError::Transport("reset".to_string()).is_transient());
        assert!(!ConnectionError::NoIdentity.is_transient());
        assert!(!ConnectionError::Protocol("bad".to_string()).is_transient());
    }

    #[test]
    fn storage_error_converts_into_layer_errors() {
        let err = StorageError::Io("disk full".to_string());
        assert!(err.is_transient());

        let key_err: KeyStorageError = err.clone().into();
        assert!(key_err.to_string().contains("disk full"));

        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::Storage(StorageError::Io(_))));
    }
}
