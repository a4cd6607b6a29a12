//! Table language → [`Program`].
//!
//! Blocks made only of literal table definitions become table declarations.
//! Every other block becomes a [`Block`]:
//!
//! - with `~` lines it is `OnWatch` and watches exactly those registers;
//! - without them it is `OnLoad` and watches every column it reads.
//!
//! Produce sets are the columns it sets plus the tables it defines or
//! appends to.

use rustc_hash::FxHashSet;
use tabflow_core::{Ident, Value, ValueKind};

use super::interp::ProgramBlock;
use super::parser::{parse_program, BlockSource, Expr, SetOp, Statement, TableLiteral, TableValue};
use super::{Program, TableDecl};
use crate::block::Block;
use crate::change::Register;
use crate::error::CompileError;
use crate::table::ColumnDef;

/// Parse and compile program text.
pub fn compile_program(text: &str) -> Result<Program, CompileError> {
    let sources = parse_program(text)?;
    let mut program = Program::new();
    let mut declared: FxHashSet<Ident> = FxHashSet::default();

    for source in sources {
        if is_declaration(&source) {
            for line in &source.lines {
                let decl = declare(&line.statement).map_err(|m| CompileError::new(line.number, m))?;
                if !declared.insert(decl.id) {
                    return Err(CompileError::new(
                        line.number,
                        format!("table #{} is declared more than once", decl.name),
                    ));
                }
                program.tables.push(decl);
            }
        } else {
            let ordinal = program.blocks.len() + 1;
            program.blocks.push(compile_block(source, ordinal)?);
        }
    }

    Ok(program)
}

fn is_declaration(source: &BlockSource) -> bool {
    source.lines.iter().all(|line| match &line.statement {
        Statement::Define { value: TableValue::Literal(literal), .. } => literal.constant_rows().is_some(),
        Statement::Define { value: TableValue::Expr(expr), .. } => expr.constant().is_some(),
        _ => false,
    })
}

fn declare(statement: &Statement) -> Result<TableDecl, String> {
    let Statement::Define { table, value } = statement else {
        return Err("expected a table definition".to_string());
    };
    let (names, rows) = match value {
        TableValue::Literal(literal) => (literal.columns.clone(), constant_rows(literal)?),
        TableValue::Expr(expr) => {
            let value = expr.constant().ok_or("expected a literal value")?;
            (Vec::new(), vec![vec![value]])
        }
    };

    let width = if names.is_empty() { rows.first().map_or(0, Vec::len) } else { names.len() };
    let kinds: Vec<ValueKind> = match rows.first() {
        Some(row) => row.iter().map(Value::kind).collect(),
        None => vec![ValueKind::Number; width],
    };
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.kind() != kinds[c] {
                return Err(format!(
                    "#{}: column {} mixes {} and {} values (row {})",
                    table,
                    c + 1,
                    kinds[c],
                    value.kind(),
                    r + 1
                ));
            }
        }
    }

    let columns = if names.is_empty() {
        kinds.iter().enumerate().map(|(i, k)| ColumnDef::positional(i + 1, *k)).collect()
    } else {
        names.iter().zip(&kinds).map(|(n, k)| ColumnDef::new(n, *k)).collect()
    };
    Ok(TableDecl::new(table, columns, rows))
}

fn constant_rows(literal: &TableLiteral) -> Result<Vec<Vec<Value>>, String> {
    literal.constant_rows().ok_or_else(|| "table declarations take literal values only".to_string())
}

fn read_register(table: &str, column: Option<&str>) -> Register {
    match column {
        Some(column) => Register::named(table, column),
        None => Register::any(Ident::of(table)),
    }
}

fn read_expr(expr: &Expr, reads: &mut Vec<Register>) {
    expr.visit_reads(&mut |table, column| reads.push(read_register(table, column)));
}

fn compile_block(source: BlockSource, ordinal: usize) -> Result<Block, CompileError> {
    let name = source.title.clone().unwrap_or_else(|| format!("block-{}", ordinal));
    let mut watch = Vec::new();
    let mut reads = Vec::new();
    let mut produce = Vec::new();
    let mut locals: FxHashSet<String> = FxHashSet::default();

    for line in &source.lines {
        let mut used = Vec::new();
        match &line.statement {
            Statement::Watch { table, column } => {
                watch.push(read_register(table, column.as_deref()));
            }
            Statement::Local { value, .. } => {
                read_expr(value, &mut reads);
                value.visit_locals(&mut |l| used.push(l.to_string()));
            }
            Statement::Set { table, column, index, op, value } => {
                read_expr(value, &mut reads);
                value.visit_locals(&mut |l| used.push(l.to_string()));
                if let Some(index) = index {
                    read_expr(index, &mut reads);
                    index.visit_locals(&mut |l| used.push(l.to_string()));
                }
                if *op != SetOp::Assign {
                    reads.push(Register::named(table, column));
                }
                produce.push(Register::named(table, column));
            }
            Statement::Define { table, value } => {
                match value {
                    TableValue::Literal(literal) => {
                        for cell in literal.rows.iter().flatten() {
                            read_expr(cell, &mut reads);
                            cell.visit_locals(&mut |l| used.push(l.to_string()));
                        }
                    }
                    TableValue::Expr(expr) => {
                        read_expr(expr, &mut reads);
                        expr.visit_locals(&mut |l| used.push(l.to_string()));
                    }
                }
                produce.push(Register::any(Ident::of(table)));
            }
            Statement::Append { table, rows } => {
                for cell in rows.rows.iter().flatten() {
                    read_expr(cell, &mut reads);
                    cell.visit_locals(&mut |l| used.push(l.to_string()));
                }
                produce.push(Register::any(Ident::of(table)));
            }
        }

        if let Some(unknown) = used.iter().find(|l| !locals.contains(*l)) {
            return Err(CompileError::new(line.number, format!("unknown local '{}'", unknown)));
        }
        if let Statement::Local { name, .. } = &line.statement {
            locals.insert(name.clone());
        }
    }

    let on_load = watch.is_empty();
    let lines = source
        .lines
        .into_iter()
        .filter(|l| !matches!(l.statement, Statement::Watch { .. }))
        .collect();

    let mut block = Block::new(name, ProgramBlock::new(lines));
    if on_load {
        block = block.on_load();
        watch = reads;
    }
    for register in watch {
        block = block.watching(register);
    }
    for register in produce {
        block = block.producing(register);
    }
    Ok(block)
}
