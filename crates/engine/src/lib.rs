//! Reactive, transactional table engine.
//!
//! A [`Core`] holds tables and blocks. Clients queue changes and commit them
//! as transactions; blocks watching the changed columns react until the
//! store settles. Every committed transaction is kept in a reversible
//! history that can be stepped through while paused.

pub mod block;
pub mod change;
pub mod core;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod history;
pub mod program;
pub mod shared;
pub mod store;
pub mod table;

#[cfg(test)]
pub mod harness;

pub use crate::block::{Activation, Block, BlockRoutine};
pub use crate::change::{AppliedChange, Change, ColumnKey, HistoryEntry, Register};
pub use crate::core::{Core, Mode};
pub use crate::error::{CompileError, EngineError, StoreError};
pub use crate::events::{CoreEvent, EventCallback, EventCollector};
pub use crate::executor::{Executor, PropagationReport};
pub use crate::graph::{BlockGraph, EdgeKind, GraphDescription};
pub use crate::history::History;
pub use crate::program::{Frontend, Program, TableDecl, TableLang};
pub use crate::shared::SharedCore;
pub use crate::store::{TableStore, TableSummary};
pub use crate::table::{ColumnDef, Table};

pub use tabflow_config::{PausedCommits, Settings};
pub use tabflow_core::{hash_name, ColumnRef, Ident, Value, ValueKind};
