use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use parley_proto::CellRecord;

use super::{Storage, StorageError};

type CellKey = (String, String, String);

/// In-memory storage implementation for testing
///
/// Uses `HashMap` for path values and an ordered map per scope for cells. All
/// state is wrapped in Arc<Mutex<>> to allow Clone and concurrent access. A
/// poisoned mutex surfaces as `StorageError::Io`.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Values addressed by `local://` path
    values: HashMap<String, Vec<u8>>,

    /// Replicated cells, per scope, keyed by (table, row, column)
    cells: HashMap<String, BTreeMap<CellKey, CellRecord>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage mutex poisoned".to_string()))
    }

    /// Number of cells stored under `scope`.
    ///
    /// Useful for debugging and testing.
    pub fn cell_count(&self, scope: &str) -> usize {
        self.lock().map(|inner| inner.cells.get(scope).map_or(0, BTreeMap::len)).unwrap_or(0)
    }
}

impl Storage for MemoryStorage {
    fn put(&self, path: &str, value: &[u8]) -> Result<(), StorageError> {
        self.lock()?.values.insert(path.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock()?.values.get(path).cloned())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.lock()?.values.remove(path);
        Ok(())
    }

    fn store_cells(&self, scope: &str, cells: &[CellRecord]) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let scoped = inner.cells.entry(scope.to_string()).or_default();
        for cell in cells {
            let key = (cell.table.clone(), cell.row.clone(), cell.column.clone());
            scoped.insert(key, cell.clone());
        }
        Ok(())
    }

    fn load_cells(&self, scope: &str) -> Result<Vec<CellRecord>, StorageError> {
        Ok(self.lock()?.cells.get(scope).map(|cells| cells.values().cloned().collect()).unwrap_or_default())
    }
}
