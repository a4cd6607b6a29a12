//! Error taxonomy for the store, the front-end and the engine.

use std::fmt;

use tabflow_core::{ColumnRef, Ident, ValueKind};

/// Failure of a single Table Store operation. The store is unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    DuplicateTable(Ident),
    UnknownTable(Ident),
    UnknownColumn { table: Ident, column: ColumnRef },
    OutOfRange { table: Ident, row: usize, rows: usize },
    TypeMismatch { table: Ident, column: usize, expected: ValueKind, found: ValueKind },
    ColumnCountMismatch { table: Ident, expected: usize, found: usize },
    /// Row 0 given where rows are 1-based.
    ZeroRow { table: Ident },
    /// Rows appended to a table that has no columns to hold them.
    NoColumns { table: Ident },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTable(id) => write!(f, "table {id} already exists"),
            Self::UnknownTable(id) => write!(f, "unknown table {id}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "table {table}: unknown {column}")
            }
            Self::OutOfRange { table, row, rows } => {
                write!(f, "table {table}: row {} out of range ({rows} rows)", row + 1)
            }
            Self::TypeMismatch { table, column, expected, found } => {
                write!(f, "table {table}, column {}: expected {expected}, found {found}", column + 1)
            }
            Self::ColumnCountMismatch { table, expected, found } => {
                write!(f, "table {table}: expected {expected} column(s), found {found}")
            }
            Self::ZeroRow { table } => write!(f, "table {table}: rows are 1-based, row 0 does not exist"),
            Self::NoColumns { table } => write!(f, "table {table} has no columns; rows cannot be appended"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Malformed program text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// 1-based source line (0 when not tied to a line).
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "compile error: {}", self.message)
        } else {
            write!(f, "compile error at line {}: {}", self.line, self.message)
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors surfaced by the Core.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Program failed to compile; the previous universe is untouched.
    Compile(CompileError),
    /// An externally submitted change failed validation; nothing was applied.
    TransactionRejected { index: usize, reason: StoreError },
    /// Propagation did not settle within the round cap; rolled back.
    DivergentTransaction { rounds: usize },
    AtOldestEntry,
    AtNewestEntry,
    /// A block produced a change the store refused; rolled back.
    InternalInvariantViolation { block: String, reason: StoreError },
    /// A block routine failed while evaluating; rolled back.
    BlockEvaluation { block: String, message: String },
    /// `process_transaction` with nothing queued.
    EmptyTransaction,
    /// Time travel requested while live.
    NotPaused,
    /// Commit refused because the engine is paused.
    CommitWhilePaused,
    /// No program has been compiled.
    NotReady,
    Store(StoreError),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile(_) => "compile_error",
            Self::TransactionRejected { .. } => "transaction_rejected",
            Self::DivergentTransaction { .. } => "divergent_transaction",
            Self::AtOldestEntry => "at_oldest_entry",
            Self::AtNewestEntry => "at_newest_entry",
            Self::InternalInvariantViolation { .. } => "internal_invariant_violation",
            Self::BlockEvaluation { .. } => "block_evaluation",
            Self::EmptyTransaction => "empty_transaction",
            Self::NotPaused => "not_paused",
            Self::CommitWhilePaused => "commit_while_paused",
            Self::NotReady => "not_ready",
            Self::Store(_) => "store_error",
        }
    }

    /// True for errors after which the Core is usable with no further action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InternalInvariantViolation { .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(e) => write!(f, "{e}"),
            Self::TransactionRejected { index, reason } => {
                write!(f, "transaction rejected at change {index}: {reason}")
            }
            Self::DivergentTransaction { rounds } => {
                write!(f, "propagation did not settle within {rounds} round(s)")
            }
            Self::AtOldestEntry => write!(f, "already at the oldest history entry"),
            Self::AtNewestEntry => write!(f, "already at the newest history entry"),
            Self::InternalInvariantViolation { block, reason } => {
                write!(f, "block '{block}' produced an invalid change: {reason}")
            }
            Self::BlockEvaluation { block, message } => {
                write!(f, "block '{block}' failed: {message}")
            }
            Self::EmptyTransaction => write!(f, "no changes queued"),
            Self::NotPaused => write!(f, "time travel requires the engine to be paused"),
            Self::CommitWhilePaused => write!(f, "commits are rejected while paused"),
            Self::NotReady => write!(f, "no program loaded"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile(e) => Some(e),
            Self::TransactionRejected { reason, .. } => Some(reason),
            Self::InternalInvariantViolation { reason, .. } => Some(reason),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<CompileError> for EngineError {
    fn from(e: CompileError) -> Self {
        EngineError::Compile(e)
    }
}
