//! Parley wire protocol
//!
//! Two channels connect a client to a room:
//!
//! - The control channel carries JSON text frames: one identity frame from the
//!   client on open, then server events (`ready`, roster changes, room info,
//!   chat messages). See [`control`].
//! - The sync relay carries CBOR binary frames owned by the replicated store.
//!   See [`sync`].
//!
//! Close codes on the control channel decide whether the client reconnects.
//! See [`close`].
//!
//! # Invariants
//!
//! Decoding never panics. Malformed or unknown frames surface as
//! [`ProtocolError`] so callers can drop them without tearing down the
//! session.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod close;
pub mod control;
pub mod errors;
pub mod sync;

pub use close::{CloseInfo, CloseKind};
pub use control::{ChatEvent, ClientFrame, Identity, OutboundMessage, ServerFrame, ThreadSummary};
pub use errors::{ProtocolError, Result};
pub use sync::{CellRecord, CellValue, Stamp, SyncMessage};
