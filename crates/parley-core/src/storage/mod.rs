//! Durable local storage abstraction
//!
//! Trait-based abstraction for the two things the client persists: small
//! values addressed by a `local://` path (key material, identity), and the
//! replicated store's cells, grouped by scope. The trait is synchronous (no
//! async) so the state machines stay free of I/O scheduling.

mod chaotic;
mod memory;
pub mod paths;

pub use chaotic::ChaoticStorage;
pub use memory::MemoryStorage;
use parley_proto::CellRecord;

pub use crate::error::StorageError;

/// Storage abstraction for key material, identity and replicated cells
///
/// Must be Clone (shared by the key manager, identity store and replicated
/// store), Send + Sync (thread-safe), and synchronous (no async methods).
/// Implementations share internal state via Arc, so clones access the same
/// underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Store `value` at `path`, overwriting any previous value.
    fn put(&self, path: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Value at `path`. `None` if nothing is stored there.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove the value at `path`. Removing a missing path is not an error.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Persist replicated cells under `scope`.
    ///
    /// # Invariants
    ///
    /// - Post: for each `(table, row, column)` in `cells`, the stored record
    ///   is the one passed in (callers only persist cells that won a merge)
    fn store_cells(&self, scope: &str, cells: &[CellRecord]) -> Result<(), StorageError>;

    /// All cells persisted under `scope`. Order is not guaranteed.
    fn load_cells(&self, scope: &str) -> Result<Vec<CellRecord>, StorageError>;
}
