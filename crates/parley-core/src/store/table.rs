//! Last-writer-wins cell tables.
//!
//! Every `(table, row, column)` holds the value with the greatest stamp seen.
//! Because "keep the maximum" is commutative, associative and idempotent,
//! replicas that have seen the same set of writes hold the same state no
//! matter the order the writes arrived in.
//!
//! Row deletion is itself a cell (`_deleted`), so deletes and later upserts
//! resolve by stamp like any other write.

use std::collections::BTreeMap;

use parley_proto::{CellRecord, CellValue, Stamp};

/// Column carrying the row's tombstone flag.
pub const DELETED_COLUMN: &str = "_deleted";

/// The replicated tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Chat messages, keyed by message id
    Messages,
    /// Channels, keyed by channel name
    Channels,
    /// Reactions, keyed by `<message id>:<emoji>:<member>`
    Reactions,
    /// Pins, keyed by message id
    Pins,
}

impl Table {
    /// Every table.
    pub const ALL: [Self; 4] = [Self::Messages, Self::Channels, Self::Reactions, Self::Pins];

    /// Wire name of the table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Channels => "channels",
            Self::Reactions => "reactions",
            Self::Pins => "pins",
        }
    }

    /// Table for a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stamped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Current value
    pub value: CellValue,
    /// Stamp of the write that produced it
    pub stamp: Stamp,
}

/// Live view of a row: every column except the tombstone.
pub type RowValues = BTreeMap<String, CellValue>;

/// All cells of all tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSet {
    rows: BTreeMap<(Table, String), BTreeMap<String, Cell>>,
}

impl TableSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one cell. Returns `true` if it won and changed local state.
    ///
    /// A cell wins if its stamp is greater than the current one. On equal
    /// stamps the greater value wins, so merge stays deterministic even if
    /// two writers share a node id.
    pub fn merge(&mut self, table: Table, record: &CellRecord) -> bool {
        let row = self.rows.entry((table, record.row.clone())).or_default();
        if !beats(record, row.get(&record.column)) {
            return false;
        }

        row.insert(record.column.clone(), Cell { value: record.value.clone(), stamp: record.stamp });
        true
    }

    /// Whether `record` would win against local state, without applying it.
    pub fn would_win(&self, table: Table, record: &CellRecord) -> bool {
        beats(record, self.rows.get(&(table, record.row.clone())).and_then(|row| row.get(&record.column)))
    }

    /// Live values of a row. `None` if the row is missing or deleted.
    pub fn row(&self, table: Table, row: &str) -> Option<RowValues> {
        let cells = self.rows.get(&(table, row.to_string()))?;
        if is_deleted(cells) {
            return None;
        }
        Some(live_values(cells))
    }

    /// Whether the row exists and is tombstoned.
    pub fn is_deleted(&self, table: Table, row: &str) -> bool {
        self.rows.get(&(table, row.to_string())).is_some_and(is_deleted)
    }

    /// Live rows of `table`, ordered by row id.
    pub fn rows(&self, table: Table) -> Vec<(String, RowValues)> {
        self.rows
            .iter()
            .filter(|((t, _), cells)| *t == table && !is_deleted(cells))
            .map(|((_, row), cells)| (row.clone(), live_values(cells)))
            .collect()
    }

    /// Every cell, tombstones included, as wire records.
    pub fn records(&self) -> Vec<CellRecord> {
        self.rows
            .iter()
            .flat_map(|((table, row), cells)| {
                cells.iter().map(move |(column, cell)| CellRecord {
                    table: table.as_str().to_string(),
                    row: row.clone(),
                    column: column.clone(),
                    value: cell.value.clone(),
                    stamp: cell.stamp,
                })
            })
            .collect()
    }

    /// Greatest stamp held, if any.
    pub fn max_stamp(&self) -> Option<Stamp> {
        self.rows.values().flat_map(|cells| cells.values().map(|c| c.stamp)).max()
    }
}

/// Whether `record` wins against `current`: greater stamp, then greater value.
fn beats(record: &CellRecord, current: Option<&Cell>) -> bool {
    current.is_none_or(|current| (current.stamp, &current.value) < (record.stamp, &record.value))
}

fn is_deleted(cells: &BTreeMap<String, Cell>) -> bool {
    cells.get(DELETED_COLUMN).is_some_and(|cell| cell.value == CellValue::Bool(true))
}

fn live_values(cells: &BTreeMap<String, Cell>) -> RowValues {
    cells
        .iter()
        .filter(|(column, _)| column.as_str() != DELETED_COLUMN)
        .map(|(column, cell)| (column.clone(), cell.value.clone()))
        .collect()
}
