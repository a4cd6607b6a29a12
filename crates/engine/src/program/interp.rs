//! Evaluation of compiled table-language blocks.
//!
//! Values are column vectors. A vector of length 1 broadcasts against any
//! other length; otherwise lengths must match. Writes made by one statement
//! are visible to the statements after it in the same block.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use tabflow_core::{ColumnRef, Ident, Value, ValueKind};

use super::parser::{Expr, Line, Op, SetOp, Statement, TableLiteral, TableValue, UnaryOp};
use crate::block::BlockRoutine;
use crate::change::Change;
use crate::store::TableStore;
use crate::table::{ColumnDef, Table};

/// Routine of a compiled block: its statements in source order.
#[derive(Debug, Clone)]
pub struct ProgramBlock {
    lines: Vec<Line>,
}

impl ProgramBlock {
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines }
    }
}

impl BlockRoutine for ProgramBlock {
    fn evaluate(&self, tables: &TableStore) -> Result<Vec<Change>, String> {
        let mut env = Env::new(tables);
        for line in &self.lines {
            env.run(&line.statement).map_err(|e| format!("line {}: {}", line.number, e))?;
        }
        Ok(env.changes)
    }
}

/// Working copy of a table touched by the block.
struct Frame {
    columns: Vec<ColumnDef>,
    data: Vec<Vec<Value>>,
    rows: usize,
}

impl Frame {
    fn load(table: &Table) -> Self {
        Self {
            columns: table.columns().to_vec(),
            data: (0..table.column_count()).map(|c| table.column_values(c)).collect(),
            rows: table.row_count(),
        }
    }

    fn empty(columns: Vec<ColumnDef>) -> Self {
        let data = vec![Vec::new(); columns.len()];
        Self { columns, data, rows: 0 }
    }

    /// Check width and kinds of a row already in column order.
    fn check_row(&self, table: &str, row: &[Value]) -> Result<(), String> {
        if row.len() != self.columns.len() {
            return Err(format!(
                "#{} has {} column(s), got a row of {}",
                table,
                self.columns.len(),
                row.len()
            ));
        }
        for (def, value) in self.columns.iter().zip(row) {
            if def.kind != value.kind() {
                return Err(format!("#{}.{} holds {} values, got {}", table, def.name, def.kind, value.kind()));
            }
        }
        Ok(())
    }

    /// Put named rows into column order.
    fn reorder(&self, table: &str, names: &[String], rows: Vec<Vec<Value>>) -> Result<Vec<Vec<Value>>, String> {
        if names.is_empty() {
            return Ok(rows);
        }
        if names.len() != self.columns.len() {
            return Err(format!("#{} has {} column(s), got {}", table, self.columns.len(), names.len()));
        }
        let mut order = Vec::with_capacity(self.columns.len());
        for def in &self.columns {
            let position = names
                .iter()
                .position(|n| Ident::of(n) == def.id)
                .ok_or_else(|| format!("missing column '{}' for #{}", def.name, table))?;
            order.push(position);
        }
        Ok(rows
            .into_iter()
            .map(|row| order.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    /// Write one cell, recording a change if the value differs.
    fn set_cell(&mut self, id: Ident, row: usize, column: usize, value: Value, out: &mut Vec<Change>) {
        if self.data[column][row].same_as(&value) {
            return;
        }
        self.data[column][row] = value.clone();
        out.push(Change::Set { table: id, row, column: ColumnRef::Id(self.columns[column].id), value });
    }

    fn append(&mut self, id: Ident, rows: Vec<Vec<Value>>, out: &mut Vec<Change>) {
        if rows.is_empty() {
            return;
        }
        for row in &rows {
            for (column, value) in row.iter().enumerate() {
                self.data[column].push(value.clone());
            }
        }
        self.rows += rows.len();
        out.push(Change::Append { table: id, rows });
    }
}

/// Column index for `#table.column`; without a name, the first column.
///
/// A name that is not a column resolves as a 1-based position when it is a
/// number in range.
fn resolve(columns: &[ColumnDef], table: &str, column: Option<&str>) -> Result<usize, String> {
    let Some(name) = column else {
        return if columns.is_empty() { Err(format!("#{} has no columns", table)) } else { Ok(0) };
    };
    let id = Ident::of(name);
    if let Some(i) = columns.iter().position(|c| c.id == id) {
        return Ok(i);
    }
    match name.parse::<usize>() {
        Ok(n) if n >= 1 && n <= columns.len() => Ok(n - 1),
        _ => Err(format!("unknown column #{}.{}", table, name)),
    }
}

/// Rows picked by an index: a boolean mask or 1-based row numbers.
fn select(selector: &[Value], len: usize) -> Result<Vec<usize>, String> {
    if selector.iter().all(|v| matches!(v, Value::Bool(_))) {
        if selector.len() == 1 {
            return Ok(if selector[0] == Value::Bool(true) { (0..len).collect() } else { Vec::new() });
        }
        if selector.len() != len {
            return Err(format!("mask has {} value(s) for {} row(s)", selector.len(), len));
        }
        return Ok(selector
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == Value::Bool(true))
            .map(|(i, _)| i)
            .collect());
    }

    selector
        .iter()
        .map(|v| match v {
            Value::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= len as f64 => Ok(*n as usize - 1),
            Value::Number(n) => Err(format!("row {} out of range ({} rows)", n, len)),
            other => Err(format!("index must be booleans or row numbers, got {}", other.kind())),
        })
        .collect()
}

fn broadcast<F>(left: &[Value], right: &[Value], f: F) -> Result<Vec<Value>, String>
where
    F: Fn(&Value, &Value) -> Result<Value, String>,
{
    match (left.len(), right.len()) {
        (1, _) => right.iter().map(|b| f(&left[0], b)).collect(),
        (_, 1) => left.iter().map(|a| f(a, &right[0])).collect(),
        (a, b) if a == b => left.iter().zip(right).map(|(a, b)| f(a, b)).collect(),
        (a, b) => Err(format!("length mismatch: {} vs {}", a, b)),
    }
}

fn op_symbol(op: Op) -> &'static str {
    match op {
        Op::Pow => "^",
        Op::Mul => "*",
        Op::Div => "/",
        Op::Add => "+",
        Op::Sub => "-",
        Op::Lt => "<",
        Op::Gt => ">",
        Op::LtEq => "<=",
        Op::GtEq => ">=",
        Op::Eq => "==",
        Op::NotEq => "!=",
        Op::And => "&",
        Op::Or => "|",
    }
}

fn binary(op: Op, a: &Value, b: &Value) -> Result<Value, String> {
    let mismatch = || format!("cannot apply {} to {} and {}", op_symbol(op), a.kind(), b.kind());
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let (Value::Number(x), Value::Number(y)) = (a, b) else {
                return Err(mismatch());
            };
            let n = match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div if *y == 0.0 => return Err("division by zero".to_string()),
                Op::Div => x / y,
                _ => x.powf(*y),
            };
            Ok(Value::Number(n))
        }
        Op::Eq | Op::NotEq => {
            if a.kind() != b.kind() {
                return Err(mismatch());
            }
            let equal = a == b;
            Ok(Value::Bool(if op == Op::Eq { equal } else { !equal }))
        }
        Op::Lt | Op::Gt | Op::LtEq | Op::GtEq => {
            let ordering = match (a, b) {
                (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
                (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
                _ => return Err(mismatch()),
            };
            let Some(ordering) = ordering else {
                // NaN compares false
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                Op::Lt => ordering.is_lt(),
                Op::Gt => ordering.is_gt(),
                Op::LtEq => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        Op::And | Op::Or => {
            let (Value::Bool(x), Value::Bool(y)) = (a, b) else {
                return Err(mismatch());
            };
            Ok(Value::Bool(if op == Op::And { *x && *y } else { *x || *y }))
        }
    }
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, String> {
    match (op, v) {
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(format!("cannot negate {}", other.kind())),
        (UnaryOp::Not, other) => Err(format!("cannot apply ! to {}", other.kind())),
    }
}

fn set_op(op: SetOp) -> Option<Op> {
    match op {
        SetOp::Assign => None,
        SetOp::Add => Some(Op::Add),
        SetOp::Sub => Some(Op::Sub),
        SetOp::Mul => Some(Op::Mul),
        SetOp::Div => Some(Op::Div),
    }
}

struct Env<'a> {
    store: &'a TableStore,
    frames: FxHashMap<Ident, Frame>,
    locals: FxHashMap<String, Vec<Value>>,
    changes: Vec<Change>,
}

impl<'a> Env<'a> {
    fn new(store: &'a TableStore) -> Self {
        Self { store, frames: FxHashMap::default(), locals: FxHashMap::default(), changes: Vec::new() }
    }

    fn exists(&self, id: Ident) -> bool {
        self.frames.contains_key(&id) || self.store.contains(id)
    }

    fn frame_mut(&mut self, table: &str) -> Result<&mut Frame, String> {
        let store = self.store;
        match self.frames.entry(Ident::of(table)) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let t = store.table(*e.key()).ok_or_else(|| format!("unknown table #{}", table))?;
                Ok(e.insert(Frame::load(t)))
            }
        }
    }

    fn read(&self, table: &str, column: Option<&str>) -> Result<Vec<Value>, String> {
        let id = Ident::of(table);
        if let Some(frame) = self.frames.get(&id) {
            let c = resolve(&frame.columns, table, column)?;
            return Ok(frame.data[c].clone());
        }
        let t = self.store.table(id).ok_or_else(|| format!("unknown table #{}", table))?;
        let c = resolve(t.columns(), table, column)?;
        Ok(t.column_values(c))
    }

    fn eval(&self, expr: &Expr) -> Result<Vec<Value>, String> {
        match expr {
            Expr::Number(n) => Ok(vec![Value::Number(*n)]),
            Expr::Text(s) => Ok(vec![Value::Text(s.clone())]),
            Expr::Boolean(b) => Ok(vec![Value::Bool(*b)]),
            Expr::Local(name) => self.locals.get(name).cloned().ok_or_else(|| format!("unknown local '{}'", name)),
            Expr::Column { table, column, index } => {
                let values = self.read(table, column.as_deref())?;
                let Some(index) = index else {
                    return Ok(values);
                };
                let rows = select(&self.eval(index)?, values.len())?;
                Ok(rows.into_iter().map(|r| values[r].clone()).collect())
            }
            Expr::Unary { op, operand } => self.eval(operand)?.iter().map(|v| unary(*op, v)).collect(),
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                broadcast(&left, &right, |a, b| binary(*op, a, b))
            }
        }
    }

    /// Evaluate literal cells; each must be a single value.
    fn eval_rows(&self, literal: &TableLiteral) -> Result<Vec<Vec<Value>>, String> {
        literal
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| {
                        let mut v = self.eval(cell)?;
                        if v.len() != 1 {
                            return Err(format!("table cell must be a single value, got {}", v.len()));
                        }
                        Ok(v.remove(0))
                    })
                    .collect()
            })
            .collect()
    }

    fn run(&mut self, statement: &Statement) -> Result<(), String> {
        match statement {
            Statement::Watch { .. } => Ok(()),
            Statement::Local { name, value } => {
                let v = self.eval(value)?;
                self.locals.insert(name.clone(), v);
                Ok(())
            }
            Statement::Set { table, column, index, op, value } => {
                self.set_column(table, column, index.as_ref(), *op, value)
            }
            Statement::Append { table, rows } => {
                let values = self.eval_rows(rows)?;
                let mut out = Vec::new();
                let frame = self.frame_mut(table)?;
                let values = frame.reorder(table, &rows.columns, values)?;
                for row in &values {
                    frame.check_row(table, row)?;
                }
                frame.append(Ident::of(table), values, &mut out);
                self.changes.extend(out);
                Ok(())
            }
            Statement::Define { table, value } => {
                let (names, rows) = match value {
                    TableValue::Literal(literal) => (literal.columns.clone(), self.eval_rows(literal)?),
                    TableValue::Expr(expr) => (Vec::new(), self.eval(expr)?.into_iter().map(|v| vec![v]).collect()),
                };
                self.define(table, names, rows)
            }
        }
    }

    fn set_column(
        &mut self,
        table: &str,
        column: &str,
        index: Option<&Expr>,
        op: SetOp,
        value: &Expr,
    ) -> Result<(), String> {
        let values = self.eval(value)?;
        let selector = index.map(|ix| self.eval(ix)).transpose()?;

        let mut out = Vec::new();
        let frame = self.frame_mut(table)?;
        let c = resolve(&frame.columns, table, Some(column))?;
        let rows = match selector {
            Some(selector) => select(&selector, frame.rows)?,
            None => (0..frame.rows).collect(),
        };
        if values.len() != 1 && values.len() != rows.len() {
            return Err(format!("cannot assign {} value(s) to {} row(s)", values.len(), rows.len()));
        }

        let kind = frame.columns[c].kind;
        let id = Ident::of(table);
        for (k, &row) in rows.iter().enumerate() {
            let rhs = if values.len() == 1 { &values[0] } else { &values[k] };
            let new = match set_op(op) {
                None => rhs.clone(),
                Some(op) => binary(op, &frame.data[c][row], rhs)?,
            };
            if new.kind() != kind {
                return Err(format!("#{}.{} holds {} values, got {}", table, column, kind, new.kind()));
            }
            frame.set_cell(id, row, c, new, &mut out);
        }
        self.changes.extend(out);
        Ok(())
    }

    /// `#t = ...`: create the table, or overwrite an existing one row by row.
    fn define(&mut self, table: &str, names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<(), String> {
        let id = Ident::of(table);
        let mut out = Vec::new();

        if !self.exists(id) {
            let width = if names.is_empty() { rows.first().map_or(0, Vec::len) } else { names.len() };
            let kinds: Vec<ValueKind> = match rows.first() {
                Some(row) => row.iter().map(Value::kind).collect(),
                None => vec![ValueKind::Number; width],
            };
            let columns: Vec<ColumnDef> = if names.is_empty() {
                kinds.iter().enumerate().map(|(i, k)| ColumnDef::positional(i + 1, *k)).collect()
            } else {
                names.iter().zip(&kinds).map(|(n, k)| ColumnDef::new(n, *k)).collect()
            };
            let mut frame = Frame::empty(columns.clone());
            for row in &rows {
                frame.check_row(table, row)?;
            }
            out.push(Change::Define { table: id, name: table.to_string(), columns });
            frame.append(id, rows, &mut out);
            self.frames.insert(id, frame);
            self.changes.extend(out);
            return Ok(());
        }

        let frame = self.frame_mut(table)?;
        let rows = frame.reorder(table, &names, rows)?;
        for row in &rows {
            frame.check_row(table, row)?;
        }
        if rows.len() < frame.rows {
            return Err(format!("cannot shrink #{} from {} to {} row(s)", table, frame.rows, rows.len()));
        }
        let existing = frame.rows;
        let mut rows = rows.into_iter();
        for (row, values) in rows.by_ref().take(existing).enumerate() {
            for (column, value) in values.into_iter().enumerate() {
                frame.set_cell(id, row, column, value, &mut out);
            }
        }
        frame.append(id, rows.collect(), &mut out);
        self.changes.extend(out);
        Ok(())
    }
}
