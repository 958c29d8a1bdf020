//! Client runtime errors.

use parley_core::{ConnectionError, KeyStorageError, StorageError, StoreError};
use parley_crypto::CryptoError;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Handshake or connect failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The link's I/O task is gone.
    #[error("transport closed")]
    Closed,
}

/// Errors from a crypto worker task.
///
/// Only the task that produced the error is affected; the pool keeps serving.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The cryptographic operation itself failed.
    #[error("crypto task failed: {0}")]
    Crypto(#[from] CryptoError),

    /// The task panicked inside the worker.
    #[error("crypto task panicked")]
    Panicked,

    /// The pool was shut down before the task completed.
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Errors returned by [`crate::ChatHandle`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection state machine rejected the operation.
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    /// Durable storage failed.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Key material could not be read or written.
    #[error("key storage: {0}")]
    Keys(#[from] KeyStorageError),

    /// Replicated store write failed.
    #[error("replicated store: {0}")]
    Store(#[from] StoreError),

    /// Crypto worker failed.
    #[error("worker: {0}")]
    Worker(#[from] WorkerError),

    /// Transport failed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// No session exists to send on.
    #[error("not connected")]
    NotConnected,

    /// The session was replaced before it became ready.
    #[error("session superseded before ready")]
    SessionSuperseded,

    /// The client runtime has stopped.
    #[error("client runtime stopped")]
    Closed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_wrap_crypto_errors() {
        let err: WorkerError = CryptoError::MalformedEnvelope.into();
        assert_eq!(err, WorkerError::Crypto(CryptoError::MalformedEnvelope));

        let client: ClientError = err.into();
        assert!(matches!(client, ClientError::Worker(WorkerError::Crypto(_))));
    }
}
