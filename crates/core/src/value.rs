//! Cell values and column addressing.

use serde::{Deserialize, Serialize};

use crate::ident::Ident;

/// Kind of a column. Every value stored in a column has the column's kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Bool,
    Text,
    Ref,
}

impl ValueKind {
    /// Value used to fill cells when a column grows without explicit input.
    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Number => Value::Number(0.0),
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Ref => Value::Ref(RowRef::new(Ident::from_raw(0), 0)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Bool => "boolean",
            ValueKind::Text => "string",
            ValueKind::Ref => "reference",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to a row of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub table: Ident,
    /// Row index (0-based)
    pub row: usize,
}

impl RowRef {
    pub fn new(table: Ident, row: usize) -> Self {
        Self { table, row }
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Ref(RowRef),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
            Value::Ref(_) => ValueKind::Ref,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_row(&self) -> Option<RowRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Bitwise identity. Unlike `==`, treats NaN as equal to itself so a
    /// rewrite of NaN is not reported as a change.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<RowRef> for Value {
    fn from(r: RowRef) -> Self {
        Value::Ref(r)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Ref(r) => write!(f, "@{}[{}]", r.table, r.row + 1),
        }
    }
}

/// How a caller names a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRef {
    /// Column identifier (hash of the column name).
    Id(Ident),
    /// 1-based column position.
    Position(usize),
    /// Unresolved number from an external client: tried as an identifier
    /// first, then as a 1-based position.
    Raw(u64),
}

impl ColumnRef {
    pub fn named(name: &str) -> Self {
        ColumnRef::Id(Ident::of(name))
    }
}

impl From<Ident> for ColumnRef {
    fn from(id: Ident) -> Self {
        ColumnRef::Id(id)
    }
}

impl From<u64> for ColumnRef {
    fn from(raw: u64) -> Self {
        ColumnRef::Raw(raw)
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRef::Id(id) => write!(f, "{}", id),
            ColumnRef::Position(p) => write!(f, "column {}", p),
            ColumnRef::Raw(raw) => write!(f, "column {:#x}", raw),
        }
    }
}
