//! The Core: one owned universe of tables, blocks and history.
//!
//! ```text
//! compile / load ──► Front-end ──► Block Graph + Table Store
//! queue_* + process_transaction ──► Executor ──► Table Store ──► History
//! pause / step_* / resume ──► History ──► Table Store
//! ```
//!
//! # Modes
//!
//! `Empty` until a program is installed, then `Live`. `pause` enters
//! `Paused`, where the visible state can be stepped through history;
//! `resume` returns to `Live` at the newest state. Installing a program from
//! any mode starts a fresh universe in `Live`; `clear` returns to `Empty`.

use std::sync::Arc;

use serde::Serialize;
use tabflow_config::{PausedCommits, Settings};
use tabflow_core::{ColumnRef, Ident, Value};

use crate::change::{Change, HistoryEntry};
use crate::error::{CompileError, EngineError, StoreError};
use crate::events::{
    CellsChangedEvent, CoreEvent, CursorMovedEvent, EventCallback, ProgramLoadedEvent,
    TransactionCommittedEvent,
};
use crate::executor::Executor;
use crate::graph::{BlockGraph, GraphDescription};
use crate::history::History;
use crate::program::{Frontend, Program, TableLang};
use crate::store::{TableStore, TableSummary};

/// Evaluation mode of a Core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No program installed.
    Empty,
    /// Commits advance the visible state.
    Live,
    /// Visible state is held for time travel.
    Paused,
}

impl Mode {
    pub fn is_ready(self) -> bool {
        self != Mode::Empty
    }
}

pub struct Core {
    store: TableStore,
    graph: BlockGraph,
    history: History,
    executor: Executor,
    settings: Settings,
    frontend: Box<dyn Frontend>,
    pending: Vec<Change>,
    listener: Option<EventCallback>,
    ready: bool,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("mode", &self.mode())
            .field("tables", &self.store.len())
            .field("blocks", &self.graph.len())
            .field("history_len", &self.history.len())
            .field("history_cursor", &self.history.cursor())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Core {
    /// Core with default settings and the built-in table language.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_frontend(settings, TableLang)
    }

    pub fn with_frontend(settings: Settings, frontend: impl Frontend + 'static) -> Self {
        Self {
            store: TableStore::new(),
            graph: BlockGraph::default(),
            history: History::with_limit(settings.max_history_entries),
            executor: Executor::from_settings(&settings),
            settings,
            frontend: Box::new(frontend),
            pending: Vec::new(),
            listener: None,
            ready: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        if !self.ready {
            Mode::Empty
        } else if self.history.is_paused() {
            Mode::Paused
        } else {
            Mode::Live
        }
    }

    /// Register the event listener, replacing any previous one.
    pub fn subscribe(&mut self, callback: impl FnMut(&CoreEvent) + Send + 'static) {
        self.listener = Some(Box::new(callback));
    }

    pub fn unsubscribe(&mut self) {
        self.listener = None;
    }

    fn emit(&mut self, event: CoreEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&event);
        }
    }

    fn require_ready(&self) -> Result<(), EngineError> {
        if self.ready {
            Ok(())
        } else {
            Err(EngineError::NotReady)
        }
    }

    // ------------------------------------------------------------------
    // Programs
    // ------------------------------------------------------------------

    /// Compile program text and install it as a fresh universe.
    ///
    /// On failure the current universe is left untouched. Failures while
    /// running the program's load-time blocks are reported as compile errors
    /// too.
    pub fn compile(&mut self, program_text: &str) -> Result<(), EngineError> {
        let program = self.frontend.compile(program_text).map_err(|e| {
            log::warn!("{}", e);
            EngineError::Compile(e)
        })?;
        self.load(program).map_err(|e| match e {
            EngineError::Compile(e) => EngineError::Compile(e),
            other => {
                log::warn!("program failed to load: {}", other);
                EngineError::Compile(CompileError::new(0, format!("program failed to load: {}", other)))
            }
        })
    }

    /// Install a program built in code. Same atomicity as [`Core::compile`].
    pub fn load(&mut self, program: Program) -> Result<(), EngineError> {
        let mut store = TableStore::new();
        for decl in program.tables {
            store.create_table(decl.id, &decl.name, decl.columns, decl.rows)?;
        }
        let graph = BlockGraph::new(program.blocks);
        let boot = self.executor.bootstrap(&mut store, &graph)?;

        let cycles = graph.cycles().len();
        log::info!(
            "loaded program: {} table(s), {} block(s), {} feedback cycle(s); bootstrap {}",
            store.len(),
            graph.len(),
            cycles,
            boot.report.summary()
        );

        self.store = store;
        self.graph = graph;
        self.history = History::with_limit(self.settings.max_history_entries);
        self.pending.clear();
        self.ready = true;

        let event = ProgramLoadedEvent { tables: self.store.len(), blocks: self.graph.len() };
        self.emit(CoreEvent::ProgramLoaded(event));
        Ok(())
    }

    /// Destroy every table, block and history entry.
    pub fn clear(&mut self) {
        self.store.clear();
        self.graph = BlockGraph::default();
        self.history = History::with_limit(self.settings.max_history_entries);
        self.pending.clear();
        self.ready = false;
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Buffer a cell write. `row` is 1-based; `column` is a column
    /// identifier or a 1-based position.
    pub fn queue_change(&mut self, name: &str, row: u64, column: u64, value: Value) -> Result<(), EngineError> {
        self.require_ready()?;
        let table = Ident::of(name);
        if row == 0 {
            return Err(EngineError::TransactionRejected {
                index: self.pending.len(),
                reason: StoreError::ZeroRow { table },
            });
        }
        self.pending.push(Change::Set {
            table,
            row: (row - 1) as usize,
            column: ColumnRef::Raw(column),
            value,
        });
        Ok(())
    }

    /// Buffer a row append.
    pub fn queue_append(&mut self, name: &str, rows: Vec<Vec<Value>>) -> Result<(), EngineError> {
        self.require_ready()?;
        self.pending.push(Change::Append { table: Ident::of(name), rows });
        Ok(())
    }

    /// Buffer any change (rows 0-based).
    pub fn queue(&mut self, change: Change) -> Result<(), EngineError> {
        self.require_ready()?;
        self.pending.push(change);
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop buffered changes without committing them.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Commit the pending changes as one transaction.
    ///
    /// The pending buffer is cleared whatever the outcome. Returns the
    /// recorded entry, or `None` when the transaction changed nothing.
    pub fn process_transaction(&mut self) -> Result<Option<Arc<HistoryEntry>>, EngineError> {
        let changes = std::mem::take(&mut self.pending);
        self.require_ready()?;
        if changes.is_empty() {
            return Err(EngineError::EmptyTransaction);
        }

        if !self.history.is_paused() {
            return self.commit_and_record(changes, true);
        }

        match self.settings.paused_commits {
            PausedCommits::Reject => Err(EngineError::CommitWhilePaused),
            PausedCommits::Branch => {
                let previous = self.history.cursor();
                let entry = self.commit_and_record(changes, true)?;
                if entry.is_some() {
                    self.emit_cursor_moved(previous);
                }
                Ok(entry)
            }
            PausedCommits::Append => {
                // Evaluate at the tip, then put the visible state back.
                let hold = self.history.cursor();
                let len_before = self.history.len();
                self.history.seek(&mut self.store, len_before)?;
                let result = self.commit_and_record(changes, false);
                let evicted = (len_before + 1).saturating_sub(self.history.len());
                let target = match &result {
                    Ok(Some(_)) => hold.saturating_sub(evicted),
                    _ => hold,
                };
                self.history.seek(&mut self.store, target)?;
                result
            }
        }
    }

    fn commit_and_record(
        &mut self,
        changes: Vec<Change>,
        visible: bool,
    ) -> Result<Option<Arc<HistoryEntry>>, EngineError> {
        let propagation = self.executor.commit(&mut self.store, &self.graph, changes)?;
        if propagation.entry.is_empty() {
            log::debug!("transaction changed nothing; not recorded");
            return Ok(None);
        }

        let entry = self.history.record(propagation.entry);
        self.emit(CoreEvent::TransactionCommitted(TransactionCommittedEvent {
            seq: entry.seq,
            submitted: entry.submitted,
            rounds: entry.rounds,
            changes: entry.changes.len(),
        }));
        if visible {
            self.emit(CoreEvent::CellsChanged(CellsChangedEvent::from_changes(entry.seq, &entry.changes)));
        }
        Ok(Some(entry))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Snapshot of a column. `column` is an identifier or 1-based position.
    pub fn get_column(&self, table_id: u64, column: u64) -> Result<Vec<Value>, EngineError> {
        self.store
            .read_column(Ident::from_raw(table_id), ColumnRef::Raw(column))
            .map_err(EngineError::Store)
    }

    /// Snapshot of a column addressed by names.
    pub fn column(&self, table: &str, column: &str) -> Result<Vec<Value>, EngineError> {
        self.store
            .read_column(Ident::of(table), ColumnRef::named(column))
            .map_err(EngineError::Store)
    }

    /// One cell, 1-based row.
    pub fn cell(&self, table: &str, row: usize, column: &str) -> Result<Value, EngineError> {
        let id = Ident::of(table);
        let row = row.checked_sub(1).ok_or(StoreError::ZeroRow { table: id })?;
        Ok(self.store.read_cell(id, row, ColumnRef::named(column))?)
    }

    pub fn list_tables(&self) -> Vec<TableSummary> {
        self.store.list_tables()
    }

    pub fn describe_block_graph(&self) -> GraphDescription {
        self.graph.describe()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_cursor(&self) -> usize {
        self.history.cursor()
    }

    pub fn history_entries(&self) -> &[Arc<HistoryEntry>] {
        self.history.entries()
    }

    pub fn tables(&self) -> &TableStore {
        &self.store
    }

    /// Digest of the visible store state.
    pub fn fingerprint(&self) -> String {
        self.store.fingerprint()
    }

    // ------------------------------------------------------------------
    // Time travel
    // ------------------------------------------------------------------

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.require_ready()?;
        self.history.pause();
        Ok(())
    }

    /// Return to live mode, showing the newest state.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.require_ready()?;
        let previous = self.history.cursor();
        self.history.resume(&mut self.store)?;
        if self.history.cursor() != previous {
            self.emit_cursor_moved(previous);
        }
        Ok(())
    }

    pub fn step_back_one(&mut self) -> Result<(), EngineError> {
        self.require_ready()?;
        let previous = self.history.cursor();
        self.history.step_back_one(&mut self.store)?;
        let entry = Arc::clone(&self.history.entries()[previous - 1]);
        self.emit_cursor_moved(previous);
        self.emit(CoreEvent::CellsChanged(CellsChangedEvent::from_changes(entry.seq, &entry.changes)));
        Ok(())
    }

    pub fn step_forward_one(&mut self) -> Result<(), EngineError> {
        self.require_ready()?;
        let previous = self.history.cursor();
        self.history.step_forward_one(&mut self.store)?;
        let entry = Arc::clone(&self.history.entries()[previous]);
        self.emit_cursor_moved(previous);
        self.emit(CoreEvent::CellsChanged(CellsChangedEvent::from_changes(entry.seq, &entry.changes)));
        Ok(())
    }

    fn emit_cursor_moved(&mut self, previous: usize) {
        let event = CursorMovedEvent { cursor: self.history.cursor(), previous, len: self.history.len() };
        self.emit(CoreEvent::CursorMoved(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{ball_core, ball_row, tick, BALL};
    use tabflow_core::hash_name;

    #[test]
    fn test_empty_core() {
        let mut core = Core::new();
        assert_eq!(core.mode(), Mode::Empty);
        assert_eq!(core.queue_change("t", 1, 1, Value::Number(1.0)), Err(EngineError::NotReady));
        assert_eq!(core.pause(), Err(EngineError::NotReady));
        assert_eq!(core.process_transaction(), Err(EngineError::NotReady));
    }

    #[test]
    fn test_compile_and_read() {
        let core = ball_core();
        assert_eq!(core.mode(), Mode::Live);
        assert_eq!(ball_row(&core), (0.0, 0.0, 1.0, 1.0));
        let x = core.get_column(hash_name("ball"), hash_name("x")).unwrap();
        assert_eq!(x, vec![Value::Number(0.0)]);
        // 1-based position
        let vy = core.get_column(hash_name("ball"), 4).unwrap();
        assert_eq!(vy, vec![Value::Number(1.0)]);
        assert_eq!(core.list_tables().len(), 2);
    }

    #[test]
    fn test_three_ticks() {
        let mut core = ball_core();
        for i in 1..=3 {
            tick(&mut core, i);
        }
        assert_eq!(ball_row(&core), (3.0, 3.0, 1.0, 1.0));
        assert_eq!(core.history_len(), 3);
        assert_eq!(core.history_cursor(), 3);
    }

    #[test]
    fn test_row_zero_rejected() {
        let mut core = ball_core();
        let err = core.queue_change("ball", 0, 1, Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, EngineError::TransactionRejected { index: 0, reason: StoreError::ZeroRow { .. } }));
        assert_eq!(core.pending_len(), 0);
    }

    #[test]
    fn test_empty_and_noop_transactions() {
        let mut core = ball_core();
        assert_eq!(core.process_transaction(), Err(EngineError::EmptyTransaction));

        core.queue_change("ball", 1, hash_name("vx"), Value::Number(1.0)).unwrap();
        assert_eq!(core.process_transaction(), Ok(None));
        assert_eq!(core.history_len(), 0);
    }

    #[test]
    fn test_failed_transaction_clears_buffer() {
        let mut core = ball_core();
        core.queue_change("ball", 9, hash_name("x"), Value::Number(1.0)).unwrap();
        assert!(matches!(core.process_transaction(), Err(EngineError::TransactionRejected { .. })));
        assert_eq!(core.pending_len(), 0);
        assert_eq!(core.process_transaction(), Err(EngineError::EmptyTransaction));
    }

    #[test]
    fn test_compile_failure_keeps_universe() {
        let mut core = ball_core();
        tick(&mut core, 1);
        let before = core.fingerprint();

        let err = core.compile("#broken = [1 2\n").unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
        assert_eq!(core.fingerprint(), before);
        assert_eq!(core.history_len(), 1);
        assert_eq!(core.mode(), Mode::Live);
    }

    #[test]
    fn test_load_time_failure_is_compile_error() {
        let mut core = ball_core();
        let before = core.fingerprint();

        let err = core.compile("#t = [a | 1]\n\n-- Broken\n#half = #t.a / 0\n").unwrap_err();
        match err {
            EngineError::Compile(e) => {
                assert_eq!(e.line, 0);
                assert!(e.message.contains("Broken"), "{}", e.message);
            }
            other => panic!("expected a compile error, got {:?}", other),
        }
        assert_eq!(core.fingerprint(), before);
        assert_eq!(core.mode(), Mode::Live);
    }

    #[test]
    fn test_load_keeps_engine_errors() {
        let seed = crate::block::Block::from_fn("seed", |_: &TableStore| Err("no input".to_string())).on_load();
        let mut core = Core::new();
        let err = core.load(Program::new().with_block(seed)).unwrap_err();
        assert!(matches!(err, EngineError::BlockEvaluation { ref block, .. } if block == "seed"));
        assert_eq!(core.mode(), Mode::Empty);
    }

    #[test]
    fn test_recompile_starts_fresh() {
        let mut core = ball_core();
        tick(&mut core, 1);
        core.pause().unwrap();
        core.compile(BALL).unwrap();
        assert_eq!(core.mode(), Mode::Live);
        assert_eq!(core.history_len(), 0);
        assert_eq!(ball_row(&core), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_clear_returns_to_empty() {
        let mut core = ball_core();
        core.clear();
        assert_eq!(core.mode(), Mode::Empty);
        assert!(core.list_tables().is_empty());
        assert!(core.describe_block_graph().blocks.is_empty());
    }

    #[test]
    fn test_steps_require_pause() {
        let mut core = ball_core();
        tick(&mut core, 1);
        assert_eq!(core.step_back_one(), Err(EngineError::NotPaused));
        core.pause().unwrap();
        assert_eq!(core.mode(), Mode::Paused);
        core.step_back_one().unwrap();
        assert_eq!(ball_row(&core), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_describe_block_graph() {
        let core = ball_core();
        let graph = core.describe_block_graph();
        assert_eq!(graph.blocks.len(), 1);
        assert_eq!(graph.blocks[0].name, "Move on every tick");
        assert!(graph.to_json().unwrap().contains("Move on every tick"));
    }
}
