//! Programs: the declared tables and blocks a Core runs.
//!
//! A [`Program`] can be built in code from custom [`BlockRoutine`]s, or
//! produced from text by a [`Frontend`]. The built-in front-end,
//! [`TableLang`], compiles a small line-oriented table language:
//!
//! ```text
//! -- Environment
//! #ball = [x y vx vy | 0 0 1 1]
//! #system/timer = [resolution: 15, tick: 0]
//!
//! -- Move on every tick
//! ~ #system/timer.tick
//! #ball.x := #ball.x + #ball.vx
//! #ball.y := #ball.y + #ball.vy
//! ```
//!
//! [`BlockRoutine`]: crate::block::BlockRoutine

pub mod compile;
pub mod interp;
pub mod parser;

use tabflow_core::{Ident, Value};

use crate::block::Block;
use crate::error::CompileError;
use crate::table::ColumnDef;

pub use compile::compile_program;

/// A table created when the program loads.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDecl {
    pub id: Ident,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl TableDecl {
    pub fn new(name: &str, columns: Vec<ColumnDef>, rows: Vec<Vec<Value>>) -> Self {
        Self { id: Ident::of(name), name: name.to_string(), columns, rows }
    }
}

/// Compiled program: initial tables plus blocks in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub tables: Vec<TableDecl>,
    pub blocks: Vec<Block>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDecl) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }
}

/// Turns program text into a [`Program`].
pub trait Frontend: Send {
    fn compile(&self, text: &str) -> Result<Program, CompileError>;
}

/// Front-end for the built-in table language.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableLang;

impl Frontend for TableLang {
    fn compile(&self, text: &str) -> Result<Program, CompileError> {
        compile_program(text)
    }
}
