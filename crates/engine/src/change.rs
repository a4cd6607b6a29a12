//! Changes, applied changes and history entries.

use serde::{Deserialize, Serialize};
use tabflow_core::{ColumnRef, Ident, Value};

use crate::error::StoreError;
use crate::store::TableStore;
use crate::table::ColumnDef;

/// Column part of a register: one column, or any column of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColumnKey {
    Column(Ident),
    Any,
}

/// A (table, column) pair a block watches or produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Register {
    pub table: Ident,
    pub column: ColumnKey,
}

impl Register {
    pub fn column(table: Ident, column: Ident) -> Self {
        Self { table, column: ColumnKey::Column(column) }
    }

    pub fn any(table: Ident) -> Self {
        Self { table, column: ColumnKey::Any }
    }

    pub fn named(table: &str, column: &str) -> Self {
        Self::column(Ident::of(table), Ident::of(column))
    }

    /// True if a write described by `self` can be observed by a watcher of `other`.
    pub fn overlaps(&self, other: &Register) -> bool {
        if self.table != other.table {
            return false;
        }
        match (self.column, other.column) {
            (ColumnKey::Any, _) | (_, ColumnKey::Any) => true,
            (ColumnKey::Column(a), ColumnKey::Column(b)) => a == b,
        }
    }
}

/// A requested mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Write one existing cell. `row` is 0-based.
    Set { table: Ident, row: usize, column: ColumnRef, value: Value },
    /// Append whole rows.
    Append { table: Ident, rows: Vec<Vec<Value>> },
    /// Create a table unless one with this id already exists.
    Define { table: Ident, name: String, columns: Vec<ColumnDef> },
}

impl Change {
    pub fn set(table: &str, row: usize, column: &str, value: impl Into<Value>) -> Self {
        Change::Set {
            table: Ident::of(table),
            row,
            column: ColumnRef::named(column),
            value: value.into(),
        }
    }

    pub fn append(table: &str, rows: Vec<Vec<Value>>) -> Self {
        Change::Append { table: Ident::of(table), rows }
    }

    pub fn table(&self) -> Ident {
        match self {
            Change::Set { table, .. } | Change::Append { table, .. } | Change::Define { table, .. } => *table,
        }
    }
}

/// A mutation the executor actually performed, with what it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppliedChange {
    /// `old` is `None` for a cell created by a row append.
    Cell {
        table: Ident,
        row: usize,
        column: usize,
        old: Option<Value>,
        new: Value,
    },
    /// A table created during the transaction.
    Created { table: Ident, name: String, columns: Vec<ColumnDef> },
}

impl AppliedChange {
    pub fn table(&self) -> Ident {
        match self {
            AppliedChange::Cell { table, .. } | AppliedChange::Created { table, .. } => *table,
        }
    }

    /// Undo this change (new -> old).
    ///
    /// Cells created by an append truncate the table back to their row, so
    /// reverting an entry last-change-first removes appended rows entirely.
    pub fn revert(&self, store: &mut TableStore) -> Result<(), StoreError> {
        match self {
            AppliedChange::Cell { table, row, column, old: Some(old), .. } => {
                store.write_cell(*table, *row, *column, old.clone())?;
            }
            AppliedChange::Cell { table, row, old: None, .. } => {
                store.truncate_rows(*table, *row)?;
            }
            AppliedChange::Created { table, .. } => {
                store.drop_table(*table).ok_or(StoreError::UnknownTable(*table))?;
            }
        }
        Ok(())
    }

    /// Redo this change (old -> new), growing rows and re-creating tables.
    pub fn replay(&self, store: &mut TableStore) -> Result<(), StoreError> {
        match self {
            AppliedChange::Cell { table, row, column, new, .. } => {
                store.write_cell_extending(*table, *row, *column, new.clone())?;
            }
            AppliedChange::Created { table, name, columns } => {
                store.create_table(*table, name, columns.clone(), Vec::new())?;
            }
        }
        Ok(())
    }
}

/// One committed transaction and everything it caused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic sequence number within the current universe (1-based).
    pub seq: u64,
    /// Number of changes the client submitted.
    pub submitted: usize,
    /// Applied changes in application order, including cascaded effects.
    pub changes: Vec<AppliedChange>,
    /// Propagation rounds that ran.
    pub rounds: usize,
    /// Names of blocks that fired, in firing order.
    pub fired: Vec<String>,
}

impl HistoryEntry {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Tables touched by this entry, deduplicated, in first-touch order.
    pub fn tables(&self) -> Vec<Ident> {
        let mut seen = Vec::new();
        for change in &self.changes {
            let table = change.table();
            if !seen.contains(&table) {
                seen.push(table);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_overlap() {
        let x = Register::named("ball", "x");
        let y = Register::named("ball", "y");
        let any = Register::any(Ident::of("ball"));
        let other = Register::named("timer", "x");

        assert!(x.overlaps(&x));
        assert!(!x.overlaps(&y));
        assert!(x.overlaps(&any));
        assert!(any.overlaps(&y));
        assert!(!x.overlaps(&other));
    }

    #[test]
    fn test_entry_tables_dedup() {
        let ball = Ident::of("ball");
        let timer = Ident::of("timer");
        let cell = |table| AppliedChange::Cell {
            table,
            row: 0,
            column: 0,
            old: Some(Value::Number(0.0)),
            new: Value::Number(1.0),
        };
        let entry = HistoryEntry {
            seq: 1,
            submitted: 1,
            changes: vec![cell(timer), cell(ball), cell(timer)],
            rounds: 1,
            fired: vec![],
        };
        assert_eq!(entry.tables(), vec![timer, ball]);
    }

    #[test]
    fn test_revert_and_replay_append() {
        use tabflow_core::ValueKind;

        let t = Ident::of("t");
        let mut store = TableStore::new();
        store
            .create_table(t, "t", vec![ColumnDef::new("v", ValueKind::Number)], vec![vec![Value::Number(1.0)]])
            .unwrap();
        let before = store.fingerprint();

        store.append_rows(t, vec![vec![Value::Number(5.0)]]).unwrap();
        let appended = AppliedChange::Cell { table: t, row: 1, column: 0, old: None, new: Value::Number(5.0) };
        let after = store.fingerprint();

        appended.revert(&mut store).unwrap();
        assert_eq!(store.fingerprint(), before);
        assert_eq!(store.table(t).unwrap().row_count(), 1);

        appended.replay(&mut store).unwrap();
        assert_eq!(store.fingerprint(), after);
    }

    #[test]
    fn test_revert_created_drops_table() {
        let t = Ident::of("fresh");
        let created = AppliedChange::Created { table: t, name: "fresh".into(), columns: vec![] };
        let mut store = TableStore::new();
        created.replay(&mut store).unwrap();
        assert!(store.contains(t));
        created.revert(&mut store).unwrap();
        assert!(!store.contains(t));
        assert_eq!(created.revert(&mut store), Err(StoreError::UnknownTable(t)));
    }
}
