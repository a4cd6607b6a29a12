//! The Table Store: exclusive owner of every table in the universe.

use std::ops::Range;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tabflow_core::{ColumnRef, Ident, Value};

use crate::error::StoreError;
use crate::table::{ColumnDef, Table};

/// Summary of a table for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub id: Ident,
    pub name: String,
    pub rows: usize,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, Default)]
pub struct TableStore {
    tables: FxHashMap<Ident, Table>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, id: Ident) -> bool {
        self.tables.contains_key(&id)
    }

    pub fn table(&self, id: Ident) -> Option<&Table> {
        self.tables.get(&id)
    }

    fn table_or_err(&self, id: Ident) -> Result<&Table, StoreError> {
        self.tables.get(&id).ok_or(StoreError::UnknownTable(id))
    }

    fn table_mut_or_err(&mut self, id: Ident) -> Result<&mut Table, StoreError> {
        self.tables.get_mut(&id).ok_or(StoreError::UnknownTable(id))
    }

    /// Create a table with initial rows.
    pub fn create_table(
        &mut self,
        id: Ident,
        name: &str,
        columns: Vec<ColumnDef>,
        initial_rows: Vec<Vec<Value>>,
    ) -> Result<(), StoreError> {
        if self.tables.contains_key(&id) {
            return Err(StoreError::DuplicateTable(id));
        }
        let mut table = Table::new(id, name, columns);
        table.append(initial_rows)?;
        self.tables.insert(id, table);
        Ok(())
    }

    /// Remove a table. Returns it if it existed.
    pub fn drop_table(&mut self, id: Ident) -> Option<Table> {
        self.tables.remove(&id)
    }

    /// Resolve a column reference against a table.
    pub fn resolve_column(&self, id: Ident, column: ColumnRef) -> Result<usize, StoreError> {
        self.table_or_err(id)?
            .resolve_column(column)
            .ok_or(StoreError::UnknownColumn { table: id, column })
    }

    pub fn read_cell(&self, id: Ident, row: usize, column: ColumnRef) -> Result<Value, StoreError> {
        let table = self.table_or_err(id)?;
        let index = table
            .resolve_column(column)
            .ok_or(StoreError::UnknownColumn { table: id, column })?;
        table
            .get(row, index)
            .ok_or(StoreError::OutOfRange { table: id, row, rows: table.row_count() })
    }

    /// Write a cell that must already exist.
    ///
    /// Returns the replaced value, or `None` if the cell already held `value`.
    pub fn write_cell(
        &mut self,
        id: Ident,
        row: usize,
        column: usize,
        value: Value,
    ) -> Result<Option<Value>, StoreError> {
        self.table_mut_or_err(id)?.set(row, column, value)
    }

    /// Write a cell, growing every column of the table to cover `row` first.
    ///
    /// Used by history replay, where the row was created by an append that
    /// is being re-applied.
    pub fn write_cell_extending(
        &mut self,
        id: Ident,
        row: usize,
        column: usize,
        value: Value,
    ) -> Result<Option<Value>, StoreError> {
        let table = self.table_mut_or_err(id)?;
        let def = table.columns().get(column).ok_or(StoreError::UnknownColumn {
            table: id,
            column: ColumnRef::Position(column + 1),
        })?;
        if def.kind != value.kind() {
            return Err(StoreError::TypeMismatch {
                table: id,
                column,
                expected: def.kind,
                found: value.kind(),
            });
        }
        table.grow_to(row + 1);
        table.set(row, column, value)
    }

    /// Append rows to every column of a table.
    pub fn append_rows(&mut self, id: Ident, rows: Vec<Vec<Value>>) -> Result<Range<usize>, StoreError> {
        self.table_mut_or_err(id)?.append(rows)
    }

    /// Shrink a table to `rows` rows.
    pub fn truncate_rows(&mut self, id: Ident, rows: usize) -> Result<(), StoreError> {
        self.table_mut_or_err(id)?.truncate(rows);
        Ok(())
    }

    /// Snapshot of a full column.
    pub fn read_column(&self, id: Ident, column: ColumnRef) -> Result<Vec<Value>, StoreError> {
        let table = self.table_or_err(id)?;
        let index = table
            .resolve_column(column)
            .ok_or(StoreError::UnknownColumn { table: id, column })?;
        Ok(table.column_values(index))
    }

    /// Destroy every table.
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Summaries of all tables, sorted by name.
    pub fn list_tables(&self) -> Vec<TableSummary> {
        let mut summaries: Vec<TableSummary> = self
            .tables
            .values()
            .map(|t| TableSummary {
                id: t.id(),
                name: t.name().to_string(),
                rows: t.row_count(),
                columns: t.columns().to_vec(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Digest of the complete store state, independent of map iteration order.
    pub fn fingerprint(&self) -> String {
        let mut ids: Vec<Ident> = self.tables.keys().copied().collect();
        ids.sort();
        let mut hasher = blake3::Hasher::new();
        for id in ids {
            self.tables[&id].hash_into(&mut hasher);
        }
        format!("blake3:{}", hasher.finalize().to_hex())
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (id, table) in &self.tables {
            assert_eq!(*id, table.id(), "table stored under the wrong id");
            table.assert_consistent();
        }
    }
}
