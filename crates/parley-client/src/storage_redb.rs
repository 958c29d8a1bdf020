//! On-disk [`Storage`] in a single redb file.
//!
//! Two tables: `local://` values (room key, passphrase, identity, node id)
//! and replicated cells keyed by scope. Each call is its own transaction.

use std::{path::Path, sync::Arc};

use parley_core::{Storage, StorageError};
use parley_proto::CellRecord;
use redb::{Database, TableDefinition};

/// Table: values
/// Key: `local://` path
/// Value: raw bytes
const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

/// Table: cells
/// Key: length-prefixed (scope, table, row, column), see [`encode_cell_key`]
/// Value: CBOR-encoded `CellRecord`
const CELLS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("cells");

/// Handle to the client's redb database. Clones share it.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open the database at `path`, creating the file and both tables if
    /// missing.
    ///
    /// # Errors
    ///
    /// `StorageError::Io` when redb cannot open or initialize the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let init = db.begin_write().map_err(io)?;
        drop(init.open_table(VALUES).map_err(io)?);
        drop(init.open_table(CELLS).map_err(io)?);
        init.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

impl Storage for RedbStorage {
    fn put(&self, path: &str, value: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(VALUES).map_err(io)?;
            table.insert(path, value).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(VALUES).map_err(io)?;

        Ok(table.get(path).map_err(io)?.map(|guard| guard.value().to_vec()))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(VALUES).map_err(io)?;
            table.remove(path).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn store_cells(&self, scope: &str, cells: &[CellRecord]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(CELLS).map_err(io)?;

            for cell in cells {
                let key = encode_cell_key(scope, cell);
                let mut encoded = Vec::new();
                ciborium::into_writer(cell, &mut encoded)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;

                table.insert(key.as_slice(), encoded.as_slice()).map_err(io)?;
            }
        }
        // One transaction per batch: a failed batch persists nothing
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_cells(&self, scope: &str) -> Result<Vec<CellRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CELLS).map_err(io)?;

        let prefix = encode_scope_prefix(scope);
        let mut cells = Vec::new();
        for entry in table.range(prefix.as_slice()..).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let cell: CellRecord = ciborium::from_reader(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            cells.push(cell);
        }

        Ok(cells)
    }
}

/// Append `part` as a 4-byte big-endian length followed by its bytes.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart, and make one
/// scope's keys a contiguous range.
fn push_part(key: &mut Vec<u8>, part: &str) {
    key.extend_from_slice(&(part.len() as u32).to_be_bytes());
    key.extend_from_slice(part.as_bytes());
}

fn encode_scope_prefix(scope: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + scope.len());
    push_part(&mut key, scope);
    key
}

/// Layout: [scope][table][row][column], each length-prefixed.
fn encode_cell_key(scope: &str, cell: &CellRecord) -> Vec<u8> {
    let mut key = encode_scope_prefix(scope);
    push_part(&mut key, &cell.table);
    push_part(&mut key, &cell.row);
    push_part(&mut key, &cell.column);
    key
}
