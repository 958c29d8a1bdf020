//! Mergeable replicated store.
//!
//! Rows of the `messages`, `channels`, `reactions` and `pins` tables are
//! shared by every client in a room and by the relay. Nobody owns a row;
//! concurrent writes resolve per cell by hybrid-logical-clock stamp, so
//! replicas converge regardless of delivery order or duplication.
//!
//! - [`hlc`]: stamps for local writes
//! - [`table`]: last-writer-wins cell tables
//! - [`ReplicatedStore`]: durable, room-scoped store
//! - [`SyncSession`]: relay protocol (load-then-save on every connection,
//!   then deltas)

pub mod hlc;
mod replicated;
mod sync;
pub mod table;

pub use hlc::HybridClock;
pub use replicated::{ReplicatedStore, RowChange};
pub use sync::{SyncAction, SyncSession, SyncState};
pub use table::{DELETED_COLUMN, RowValues, Table, TableSet};
