//! Room-scoped replicated store with local durability.

use std::collections::{BTreeMap, BTreeSet};

use parley_proto::{CellRecord, CellValue};
use tracing::{debug, warn};

use super::{
    hlc::HybridClock,
    table::{DELETED_COLUMN, RowValues, Table, TableSet},
};
use crate::{
    error::StoreError,
    storage::{Storage, paths},
};

/// A row whose live state changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowChange {
    /// Table of the row
    pub table: Table,
    /// Row id
    pub row: String,
    /// Whether the row is now deleted
    pub deleted: bool,
}

/// Replicated tables for one room.
///
/// Local writes are stamped by this node's hybrid logical clock, persisted,
/// and only then applied. Remote cells go through the same last-writer-wins
/// merge, and only the cells that win are persisted.
///
/// The store itself does no networking; [`super::SyncSession`] decides what
/// to send and when.
#[derive(Debug, Clone)]
pub struct ReplicatedStore<S: Storage> {
    room: String,
    scope: String,
    storage: S,
    clock: HybridClock,
    tables: TableSet,
}

impl<S: Storage> ReplicatedStore<S> {
    /// Open the store for `room`, restoring persisted cells.
    ///
    /// `node` must be unique among the room's writers; `wall_millis` seeds
    /// the clock.
    ///
    /// # Errors
    ///
    /// - `StoreError::Storage` if persisted cells cannot be loaded
    pub fn create(room: &str, node: u64, storage: S, wall_millis: u64) -> Result<Self, StoreError> {
        let scope = paths::store_scope(room);
        let mut tables = TableSet::new();
        let mut clock = HybridClock::new(node);

        let persisted = storage.load_cells(&scope)?;
        let restored = persisted.len();
        for record in &persisted {
            match Table::parse(&record.table) {
                Some(table) => {
                    tables.merge(table, record);
                },
                None => warn!(table = %record.table, "skipping persisted cell of unknown table"),
            }
        }
        if let Some(max) = tables.max_stamp() {
            clock.observe(max, wall_millis);
        }

        debug!(room, node, restored, "replicated store opened");
        Ok(Self { room: room.to_string(), scope, storage, clock, tables })
    }

    /// Room this store replicates.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Writer node id.
    pub fn node(&self) -> u64 {
        self.clock.node()
    }

    /// Insert or update columns of a row, clearing any tombstone.
    ///
    /// Returns the written cells, for the sync session to transmit.
    ///
    /// # Errors
    ///
    /// - `StoreError::Storage` if persisting fails; nothing is applied
    pub fn upsert<K, V>(
        &mut self,
        table: Table,
        row: &str,
        values: impl IntoIterator<Item = (K, V)>,
        wall_millis: u64,
    ) -> Result<Vec<CellRecord>, StoreError>
    where
        K: Into<String>,
        V: Into<CellValue>,
    {
        let columns: BTreeMap<String, CellValue> = values
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .filter(|(column, _)| column != DELETED_COLUMN)
            .collect();

        let stamp = self.clock.tick(wall_millis);
        let mut records: Vec<CellRecord> = columns
            .into_iter()
            .map(|(column, value)| CellRecord {
                table: table.as_str().to_string(),
                row: row.to_string(),
                column,
                value,
                stamp,
            })
            .collect();

        records.push(CellRecord {
            table: table.as_str().to_string(),
            row: row.to_string(),
            column: DELETED_COLUMN.to_string(),
            value: CellValue::Bool(false),
            stamp,
        });

        self.commit(table, &records)?;
        Ok(records)
    }

    /// Tombstone a row.
    ///
    /// # Errors
    ///
    /// - `StoreError::Storage` if persisting fails; nothing is applied
    pub fn delete_row(&mut self, table: Table, row: &str, wall_millis: u64) -> Result<Vec<CellRecord>, StoreError> {
        let records = vec![CellRecord {
            table: table.as_str().to_string(),
            row: row.to_string(),
            column: DELETED_COLUMN.to_string(),
            value: CellValue::Bool(true),
            stamp: self.clock.tick(wall_millis),
        }];

        self.commit(table, &records)?;
        Ok(records)
    }

    fn commit(&mut self, table: Table, records: &[CellRecord]) -> Result<(), StoreError> {
        self.storage.store_cells(&self.scope, records)?;
        for record in records {
            self.tables.merge(table, record);
        }
        Ok(())
    }

    /// Merge cells received from the relay.
    ///
    /// Returns the rows whose state changed. Applying the same cells again
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// - `StoreError::Storage` if persisting the winners fails; nothing is
    ///   applied and the next snapshot retries
    pub fn merge_remote(&mut self, cells: &[CellRecord], wall_millis: u64) -> Result<Vec<RowChange>, StoreError> {
        // Best candidate per cell coordinate, so storage and memory agree even
        // if one batch carries several writes to the same cell
        let mut winners: BTreeMap<(Table, &str, &str), &CellRecord> = BTreeMap::new();
        for record in cells {
            let Some(table) = Table::parse(&record.table) else {
                warn!(table = %record.table, row = %record.row, "ignoring cell of unknown table");
                continue;
            };
            if !self.tables.would_win(table, record) {
                continue;
            }
            winners
                .entry((table, record.row.as_str(), record.column.as_str()))
                .and_modify(|best| {
                    if (best.stamp, &best.value) < (record.stamp, &record.value) {
                        *best = record;
                    }
                })
                .or_insert(record);
        }

        if let Some(max) = cells.iter().map(|c| c.stamp).max() {
            self.clock.observe(max, wall_millis);
        }
        if winners.is_empty() {
            return Ok(Vec::new());
        }

        let persist: Vec<CellRecord> = winners.values().map(|r| (*r).clone()).collect();
        self.storage.store_cells(&self.scope, &persist)?;

        let mut touched = BTreeSet::new();
        for ((table, ..), record) in winners {
            if self.tables.merge(table, record) {
                touched.insert((table, record.row.clone()));
            }
        }

        Ok(touched
            .into_iter()
            .map(|(table, row)| {
                let deleted = self.tables.is_deleted(table, &row);
                RowChange { table, row, deleted }
            })
            .collect())
    }

    /// Live values of a row. `None` if missing or deleted.
    pub fn get_row(&self, table: Table, row: &str) -> Option<RowValues> {
        self.tables.row(table, row)
    }

    /// Live rows of `table`, ordered by row id.
    pub fn rows(&self, table: Table) -> Vec<(String, RowValues)> {
        self.tables.rows(table)
    }

    /// Every cell, tombstones included.
    pub fn all_cells(&self) -> Vec<CellRecord> {
        self.tables.records()
    }

    /// Merged state, for convergence checks.
    pub fn tables(&self) -> &TableSet {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::Stamp;

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage};

    fn store(node: u64, storage: MemoryStorage) -> ReplicatedStore<MemoryStorage> {
        ReplicatedStore::create("general", node, storage, 1_000).unwrap()
    }

    #[test]
    fn upsert_then_read() {
        let mut s = store(1, MemoryStorage::new());
        let written = s.upsert(Table::Messages, "m1", [("text", "hello"), ("sender", "alice")], 1_000).unwrap();

        assert_eq!(written.len(), 3);
        let row = s.get_row(Table::Messages, "m1").unwrap();
        assert_eq!(row["text"], CellValue::from("hello"));
        assert_eq!(row["sender"], CellValue::from("alice"));
    }

    #[test]
    fn writes_survive_reopen() {
        let storage = MemoryStorage::new();
        {
            let mut s = store(1, storage.clone());
            s.upsert(Table::Channels, "general", [("topic", "chat")], 1_000).unwrap();
            s.upsert(Table::Messages, "m1", [("text", "hi")], 1_001).unwrap();
            s.delete_row(Table::Messages, "m1", 1_002).unwrap();
        }

        let reopened = store(1, storage);
        assert_eq!(reopened.get_row(Table::Channels, "general").unwrap()["topic"], CellValue::from("chat"));
        assert!(reopened.get_row(Table::Messages, "m1").is_none());
    }

    #[test]
    fn reopened_clock_stays_ahead_of_persisted_stamps() {
        let storage = MemoryStorage::new();
        let mut s = store(1, storage.clone());
        let first = s.upsert(Table::Messages, "m1", [("text", "a")], 50_000).unwrap();

        let mut reopened = ReplicatedStore::create("general", 1, storage, 10).unwrap();
        let second = reopened.upsert(Table::Messages, "m1", [("text", "b")], 10).unwrap();
        assert!(second[0].stamp > first[0].stamp);
        assert_eq!(reopened.get_row(Table::Messages, "m1").unwrap()["text"], CellValue::from("b"));
    }

    #[test]
    fn failed_persist_applies_nothing() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let mut s = ReplicatedStore::create("general", 1, storage, 0).unwrap();
        s.upsert(Table::Messages, "m1", [("text", "kept")], 1).unwrap();

        let mut failing = ReplicatedStore {
            storage: ChaoticStorage::new(MemoryStorage::new(), 1.0),
            room: s.room.clone(),
            scope: s.scope.clone(),
            clock: s.clock.clone(),
            tables: s.tables.clone(),
        };

        assert!(failing.upsert(Table::Messages, "m1", [("text", "lost")], 2).is_err());
        assert_eq!(failing.get_row(Table::Messages, "m1").unwrap()["text"], CellValue::from("kept"));
    }

    #[test]
    fn merge_remote_reports_changes_once() {
        let mut a = store(1, MemoryStorage::new());
        let mut b = store(2, MemoryStorage::new());

        let cells = a.upsert(Table::Messages, "m1", [("text", "hi")], 1_000).unwrap();
        let changes = b.merge_remote(&cells, 1_000).unwrap();
        assert_eq!(changes, vec![RowChange { table: Table::Messages, row: "m1".to_string(), deleted: false }]);

        assert!(b.merge_remote(&cells, 1_000).unwrap().is_empty());
        assert_eq!(a.tables(), b.tables());
    }

    #[test]
    fn remote_delete_reports_deleted() {
        let mut a = store(1, MemoryStorage::new());
        let mut b = store(2, MemoryStorage::new());

        b.merge_remote(&a.upsert(Table::Pins, "m1", [("pinned_by", "alice")], 1).unwrap(), 1).unwrap();
        let changes = b.merge_remote(&a.delete_row(Table::Pins, "m1", 2).unwrap(), 2).unwrap();

        assert!(changes[0].deleted);
        assert!(b.get_row(Table::Pins, "m1").is_none());
    }

    #[test]
    fn unknown_tables_are_ignored() {
        let mut s = store(1, MemoryStorage::new());
        let cell = CellRecord {
            table: "users".to_string(),
            row: "x".to_string(),
            column: "name".to_string(),
            value: CellValue::from("eve"),
            stamp: Stamp { millis: 5, counter: 0, node: 9 },
        };
        assert!(s.merge_remote(&[cell], 5).unwrap().is_empty());
        assert!(s.all_cells().is_empty());
    }

    #[test]
    fn upsert_cannot_smuggle_tombstone() {
        let mut s = store(1, MemoryStorage::new());
        s.upsert(Table::Messages, "m1", [("text", CellValue::from("hi")), (DELETED_COLUMN, CellValue::Bool(true))], 1)
            .unwrap();
        assert!(s.get_row(Table::Messages, "m1").is_some());
    }
}
