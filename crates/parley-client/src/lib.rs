//! Parley client runtime
//!
//! Drives the [`parley_core`] state machines with real I/O: WebSocket
//! transports, a crypto worker pool, durable storage and a presentation
//! callback.
//!
//! # Components
//!
//! - [`start`] / [`ChatHandle`]: the runtime task and its handle
//! - [`Presenter`]: everything the user sees
//! - [`CryptoWorkerPool`]: encryption, decryption and key derivation off the
//!   event loop
//! - [`transport`]: the [`Connector`] seam, with WebSocket and in-memory
//!   implementations
//! - [`RedbStorage`]: durable [`parley_core::Storage`]
//! - [`SystemEnv`]: tokio clock and OS randomness
//!
//! # Example
//!
//! ```no_run
//! use parley_client::{ClientConfig, MessageSummary, Presenter, RedbStorage, SystemEnv, WsConnector};
//! use parley_core::ConnectionStatus;
//!
//! struct Log;
//!
//! impl Presenter for Log {
//!     fn on_connection_status_change(&mut self, _status: ConnectionStatus) {}
//!     fn on_message_ready(&mut self, _message: MessageSummary) {}
//!     fn on_ready_barrier_crossed(&mut self) {}
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = RedbStorage::open("parley.redb")?;
//! let chat = parley_client::start(ClientConfig::default(), storage, WsConnector::new(), SystemEnv::new(), Log).await?;
//! chat.join(Some("alice")).await?;
//! chat.send_message("hello").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod identity;
mod presenter;
mod runtime;
mod storage_redb;
mod store_driver;
mod system_env;
pub mod transport;
pub mod worker_pool;

pub use config::{ClientConfig, MessageRoute};
pub use error::{ClientError, TransportError, WorkerError};
pub use identity::IdentityStore;
pub use presenter::{
    DECRYPT_FAILED_PLACEHOLDER, ENCRYPTED_PLACEHOLDER, MessageSummary, Presenter,
    UNREADABLE_PLACEHOLDER,
};
pub use runtime::{ChatHandle, start};
pub use storage_redb::RedbStorage;
pub use system_env::SystemEnv;
pub use transport::{Connector, MemoryConnector, MemoryPeer, WsConnector};
pub use worker_pool::CryptoWorkerPool;
