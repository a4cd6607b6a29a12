//! Columnar table storage.
//!
//! A `Table` keeps one homogeneous `Vec` per column. All columns have the
//! same length as the table's row count at all times; every mutator checks
//! its whole input before touching any column.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tabflow_core::{ColumnRef, Ident, RowRef, Value, ValueKind};

use crate::error::StoreError;

/// Declared column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub id: Ident,
    pub kind: ValueKind,
}

impl ColumnDef {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self { name: name.to_string(), id: Ident::of(name), kind }
    }

    /// Column named by its 1-based position, for tables declared without headers.
    pub fn positional(position: usize, kind: ValueKind) -> Self {
        Self::new(&position.to_string(), kind)
    }
}

/// Homogeneous storage for one column.
#[derive(Debug, Clone, PartialEq)]
enum ColumnData {
    Number(Vec<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    Ref(Vec<RowRef>),
}

impl ColumnData {
    fn with_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Number => ColumnData::Number(Vec::new()),
            ValueKind::Bool => ColumnData::Bool(Vec::new()),
            ValueKind::Text => ColumnData::Text(Vec::new()),
            ValueKind::Ref => ColumnData::Ref(Vec::new()),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self {
            ColumnData::Number(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Ref(v) => v.len(),
        }
    }

    fn get(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::Number(v) => v.get(row).map(|n| Value::Number(*n)),
            ColumnData::Bool(v) => v.get(row).map(|b| Value::Bool(*b)),
            ColumnData::Text(v) => v.get(row).map(|s| Value::Text(s.clone())),
            ColumnData::Ref(v) => v.get(row).map(|r| Value::Ref(*r)),
        }
    }

    /// Store `value` at `row`. Kind and range are checked by the caller.
    fn set(&mut self, row: usize, value: Value) {
        match (self, value) {
            (ColumnData::Number(v), Value::Number(n)) => v[row] = n,
            (ColumnData::Bool(v), Value::Bool(b)) => v[row] = b,
            (ColumnData::Text(v), Value::Text(s)) => v[row] = s,
            (ColumnData::Ref(v), Value::Ref(r)) => v[row] = r,
            _ => debug_assert!(false, "column kind checked before set"),
        }
    }

    fn push(&mut self, value: Value) {
        match (self, value) {
            (ColumnData::Number(v), Value::Number(n)) => v.push(n),
            (ColumnData::Bool(v), Value::Bool(b)) => v.push(b),
            (ColumnData::Text(v), Value::Text(s)) => v.push(s),
            (ColumnData::Ref(v), Value::Ref(r)) => v.push(r),
            _ => debug_assert!(false, "column kind checked before push"),
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            ColumnData::Number(v) => v.truncate(len),
            ColumnData::Bool(v) => v.truncate(len),
            ColumnData::Text(v) => v.truncate(len),
            ColumnData::Ref(v) => v.truncate(len),
        }
    }

    fn grow(&mut self, len: usize) {
        match self {
            ColumnData::Number(v) => v.resize(len, 0.0),
            ColumnData::Bool(v) => v.resize(len, false),
            ColumnData::Text(v) => v.resize(len, String::new()),
            ColumnData::Ref(v) => v.resize(len, RowRef::new(Ident::from_raw(0), 0)),
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            ColumnData::Number(v) => {
                for n in v {
                    hasher.update(&n.to_bits().to_le_bytes());
                }
            }
            ColumnData::Bool(v) => {
                for b in v {
                    hasher.update(&[*b as u8]);
                }
            }
            ColumnData::Text(v) => {
                for s in v {
                    hasher.update(&(s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
            }
            ColumnData::Ref(v) => {
                for r in v {
                    hasher.update(&r.table.raw().to_le_bytes());
                    hasher.update(&(r.row as u64).to_le_bytes());
                }
            }
        }
    }
}

/// A named columnar relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    id: Ident,
    name: String,
    columns: Vec<ColumnDef>,
    data: Vec<ColumnData>,
    rows: usize,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new(id: Ident, name: &str, columns: Vec<ColumnDef>) -> Self {
        let data = columns.iter().map(|c| ColumnData::with_kind(c.kind)).collect();
        Self { id, name: name.to_string(), columns, data, rows: 0 }
    }

    pub fn id(&self) -> Ident {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Index (0-based) of the column with this identifier.
    pub fn column_index(&self, id: Ident) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    /// Resolve a column reference to a 0-based index.
    ///
    /// `Raw` numbers are tried as identifiers first, then as 1-based positions.
    pub fn resolve_column(&self, column: ColumnRef) -> Option<usize> {
        match column {
            ColumnRef::Id(id) => self.column_index(id),
            ColumnRef::Position(p) => (p >= 1 && p <= self.columns.len()).then(|| p - 1),
            ColumnRef::Raw(raw) => self.column_index(Ident::from_raw(raw)).or_else(|| {
                let p = usize::try_from(raw).ok()?;
                (p >= 1 && p <= self.columns.len()).then(|| p - 1)
            }),
        }
    }

    pub fn get(&self, row: usize, column: usize) -> Option<Value> {
        self.data.get(column)?.get(row)
    }

    /// Check that `value` can be written at (row, column) without growing.
    pub fn check_write(&self, row: usize, column: usize, value: &Value) -> Result<(), StoreError> {
        self.check_kind(column, value)?;
        if row >= self.rows {
            return Err(StoreError::OutOfRange { table: self.id, row, rows: self.rows });
        }
        Ok(())
    }

    fn check_kind(&self, column: usize, value: &Value) -> Result<(), StoreError> {
        let Some(def) = self.columns.get(column) else {
            return Err(StoreError::UnknownColumn {
                table: self.id,
                column: ColumnRef::Position(column + 1),
            });
        };
        if def.kind != value.kind() {
            return Err(StoreError::TypeMismatch {
                table: self.id,
                column,
                expected: def.kind,
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// Write a cell. Returns the replaced value, or `None` if the cell
    /// already held `value` (nothing is written).
    pub fn set(&mut self, row: usize, column: usize, value: Value) -> Result<Option<Value>, StoreError> {
        self.check_write(row, column, &value)?;
        let old = self.data[column].get(row);
        match old {
            Some(old) if old.same_as(&value) => Ok(None),
            old => {
                self.data[column].set(row, value);
                Ok(old)
            }
        }
    }

    /// Check a batch of rows against the column count and kinds.
    pub fn check_rows(&self, rows: &[Vec<Value>]) -> Result<(), StoreError> {
        if self.columns.is_empty() && !rows.is_empty() {
            return Err(StoreError::NoColumns { table: self.id });
        }
        for row in rows {
            if row.len() != self.columns.len() {
                return Err(StoreError::ColumnCountMismatch {
                    table: self.id,
                    expected: self.columns.len(),
                    found: row.len(),
                });
            }
            for (column, value) in row.iter().enumerate() {
                self.check_kind(column, value)?;
            }
        }
        Ok(())
    }

    /// Append rows to every column. Returns the range of new row indices.
    pub fn append(&mut self, rows: Vec<Vec<Value>>) -> Result<Range<usize>, StoreError> {
        self.check_rows(&rows)?;
        let start = self.rows;
        for row in rows {
            for (column, value) in row.into_iter().enumerate() {
                self.data[column].push(value);
            }
            self.rows += 1;
        }
        Ok(start..self.rows)
    }

    /// Grow every column to `rows`, filling with kind defaults.
    pub fn grow_to(&mut self, rows: usize) {
        if rows <= self.rows {
            return;
        }
        for column in &mut self.data {
            column.grow(rows);
        }
        self.rows = rows;
    }

    /// Shrink every column to `rows`.
    pub fn truncate(&mut self, rows: usize) {
        if rows >= self.rows {
            return;
        }
        for column in &mut self.data {
            column.truncate(rows);
        }
        self.rows = rows;
    }

    /// Snapshot of one column.
    pub fn column_values(&self, column: usize) -> Vec<Value> {
        (0..self.rows).filter_map(|row| self.get(row, column)).collect()
    }

    /// Snapshot of one row.
    pub fn row_values(&self, row: usize) -> Vec<Value> {
        (0..self.columns.len()).filter_map(|column| self.get(row, column)).collect()
    }

    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.id.raw().to_le_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(&(self.rows as u64).to_le_bytes());
        for (def, data) in self.columns.iter().zip(&self.data) {
            hasher.update(&def.id.raw().to_le_bytes());
            hasher.update(def.kind.name().as_bytes());
            data.hash_into(hasher);
        }
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        assert_eq!(self.columns.len(), self.data.len(), "column defs and storage disagree");
        for (def, data) in self.columns.iter().zip(&self.data) {
            assert_eq!(data.len(), self.rows, "column '{}' has wrong length", def.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball() -> Table {
        let mut t = Table::new(
            Ident::of("ball"),
            "ball",
            vec![
                ColumnDef::new("x", ValueKind::Number),
                ColumnDef::new("y", ValueKind::Number),
                ColumnDef::new("label", ValueKind::Text),
            ],
        );
        t.append(vec![vec![Value::Number(0.0), Value::Number(0.0), "a".into()]]).unwrap();
        t
    }

    #[test]
    fn test_resolve_column() {
        let t = ball();
        assert_eq!(t.resolve_column(ColumnRef::named("y")), Some(1));
        assert_eq!(t.resolve_column(ColumnRef::Position(1)), Some(0));
        assert_eq!(t.resolve_column(ColumnRef::Position(0)), None);
        assert_eq!(t.resolve_column(ColumnRef::Position(4)), None);
        assert_eq!(t.resolve_column(ColumnRef::Raw(Ident::of("label").raw())), Some(2));
        assert_eq!(t.resolve_column(ColumnRef::Raw(3)), Some(2));
        assert_eq!(t.resolve_column(ColumnRef::Raw(9)), None);
    }

    #[test]
    fn test_set_returns_old_value_only_on_change() {
        let mut t = ball();
        assert_eq!(t.set(0, 0, Value::Number(0.0)).unwrap(), None);
        assert_eq!(t.set(0, 0, Value::Number(2.0)).unwrap(), Some(Value::Number(0.0)));
        assert_eq!(t.get(0, 0), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_set_type_mismatch_leaves_table_unchanged() {
        let mut t = ball();
        let before = t.clone();
        let err = t.set(0, 2, Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { column: 2, .. }));
        assert_eq!(t, before);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut t = ball();
        assert!(matches!(
            t.set(1, 0, Value::Number(1.0)),
            Err(StoreError::OutOfRange { row: 1, rows: 1, .. })
        ));
    }

    #[test]
    fn test_append_is_all_or_nothing() {
        let mut t = ball();
        let before = t.clone();
        let rows = vec![
            vec![Value::Number(1.0), Value::Number(1.0), "b".into()],
            vec![Value::Number(2.0), Value::Number(2.0)],
        ];
        assert!(matches!(
            t.append(rows),
            Err(StoreError::ColumnCountMismatch { expected: 3, found: 2, .. })
        ));
        assert_eq!(t, before);

        let range = t.append(vec![vec![Value::Number(1.0), Value::Number(1.0), "b".into()]]).unwrap();
        assert_eq!(range, 1..2);
        assert_eq!(t.row_count(), 2);
        t.assert_consistent();
    }

    #[test]
    fn test_append_to_columnless_table() {
        let mut t = Table::new(Ident::of("empty"), "empty", Vec::new());
        assert_eq!(t.append(Vec::new()), Ok(0..0));
        assert!(matches!(t.append(vec![Vec::new()]), Err(StoreError::NoColumns { .. })));
        assert_eq!(t.row_count(), 0);
    }

    #[test]
    fn test_grow_and_truncate() {
        let mut t = ball();
        t.grow_to(3);
        assert_eq!(t.row_count(), 3);
        assert_eq!(t.get(2, 2), Some(Value::Text(String::new())));
        t.assert_consistent();

        t.truncate(1);
        assert_eq!(t.row_count(), 1);
        assert_eq!(t.row_values(0), vec![Value::Number(0.0), Value::Number(0.0), Value::from("a")]);
        t.assert_consistent();
    }

    #[test]
    fn test_column_values() {
        let mut t = ball();
        t.append(vec![vec![Value::Number(5.0), Value::Number(6.0), "b".into()]]).unwrap();
        assert_eq!(t.column_values(1), vec![Value::Number(0.0), Value::Number(6.0)]);
    }
}
