//! Transaction execution and propagation to a fixpoint.
//!
//! A commit applies the submitted changes, then evaluates every block whose
//! watch set was touched, in graph order, round after round until no block is
//! scheduled. Every applied change goes into an undo buffer; any failure after
//! the first write rewinds the buffer so the store is left exactly as it was.
//!
//! # Scheduling
//!
//! Within a round, blocks run in graph order and each block's changes are
//! applied before the next block runs. When a block touches a register:
//!
//! - a watcher already queued later in the round picks up the fresh data;
//! - a watcher that already fired this round, or that is not queued, is
//!   scheduled for the next round.
//!
//! A block fires at most once per round.

use std::collections::BTreeSet;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tabflow_config::Settings;

use crate::change::{AppliedChange, Change, HistoryEntry, Register};
use crate::error::{EngineError, StoreError};
use crate::graph::BlockGraph;
use crate::store::TableStore;

/// Round cap used when none is configured.
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Report from one propagation (a commit or the load-time bootstrap).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagationReport {
    /// Changes submitted by the client (0 for bootstrap).
    pub submitted: usize,
    /// Rounds that ran.
    pub rounds: usize,
    /// Block evaluations across all rounds.
    pub blocks_evaluated: usize,
    /// Cell writes that changed a value, including appended cells.
    pub cells_changed: usize,
    /// Tables created during propagation.
    pub tables_created: usize,
    /// Wall time in microseconds.
    pub duration_us: u64,
}

impl PropagationReport {
    /// Concise one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {} round(s), {} block(s) evaluated, {}us",
            self.cells_changed, self.rounds, self.blocks_evaluated, self.duration_us
        )
    }

    /// Format: `[propagate] 120us  submitted=1  rounds=2  blocks=3  cells=4  created=0`
    pub fn log_line(&self) -> String {
        format!(
            "[propagate] {:>5}us  submitted={}  rounds={}  blocks={}  cells={}  created={}",
            self.duration_us,
            self.submitted,
            self.rounds,
            self.blocks_evaluated,
            self.cells_changed,
            self.tables_created,
        )
    }
}

/// Result of a successful propagation.
#[derive(Debug, Clone)]
pub struct Propagation {
    /// The entry to record. `seq` is assigned by the history.
    pub entry: HistoryEntry,
    pub report: PropagationReport,
}

/// Runs transactions against a store and block graph.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    max_rounds: usize,
    log_reports: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self { max_rounds: DEFAULT_MAX_ROUNDS, log_reports: true }
    }
}

impl Executor {
    pub fn new(max_rounds: usize) -> Self {
        Self { max_rounds: max_rounds.max(1), ..Self::default() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self { max_rounds: settings.max_rounds.max(1), log_reports: settings.log_reports }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Apply `changes` atomically and propagate them to a fixpoint.
    ///
    /// On error the store is identical to its state before the call.
    pub fn commit(
        &self,
        store: &mut TableStore,
        graph: &BlockGraph,
        changes: Vec<Change>,
    ) -> Result<Propagation, EngineError> {
        if changes.is_empty() {
            return Err(EngineError::EmptyTransaction);
        }
        let start = Instant::now();
        let submitted = changes.len();
        let mut run = Run::default();

        for (index, change) in changes.into_iter().enumerate() {
            if let Err(reason) = apply_change(store, change, &mut run.applied, &mut run.touched) {
                rollback(store, &run.applied);
                log::warn!("transaction rejected at change {}: {}", index, reason);
                return Err(EngineError::TransactionRejected { index, reason });
            }
        }

        let mut initial = BTreeSet::new();
        for register in std::mem::take(&mut run.touched) {
            for block in graph.watchers(&register) {
                initial.insert(graph.rank(block));
            }
        }

        self.finish(store, graph, run, initial, submitted, start)
    }

    /// Evaluate every `OnLoad` block once, with normal propagation.
    ///
    /// Used right after a program is installed; the result forms the baseline
    /// and is not meant to be recorded.
    pub fn bootstrap(&self, store: &mut TableStore, graph: &BlockGraph) -> Result<Propagation, EngineError> {
        let start = Instant::now();
        let initial: BTreeSet<usize> = graph.on_load_blocks().into_iter().map(|b| graph.rank(b)).collect();
        self.finish(store, graph, Run::default(), initial, 0, start)
    }

    fn finish(
        &self,
        store: &mut TableStore,
        graph: &BlockGraph,
        mut run: Run,
        initial: BTreeSet<usize>,
        submitted: usize,
        start: Instant,
    ) -> Result<Propagation, EngineError> {
        if let Err(e) = self.propagate(store, graph, &mut run, initial) {
            rollback(store, &run.applied);
            return Err(e);
        }

        let report = PropagationReport {
            submitted,
            rounds: run.rounds,
            blocks_evaluated: run.fired.len(),
            cells_changed: run
                .applied
                .iter()
                .filter(|c| matches!(c, AppliedChange::Cell { .. }))
                .count(),
            tables_created: run
                .applied
                .iter()
                .filter(|c| matches!(c, AppliedChange::Created { .. }))
                .count(),
            duration_us: start.elapsed().as_micros() as u64,
        };
        if self.log_reports {
            log::debug!("{}", report.log_line());
        }

        let entry = HistoryEntry {
            seq: 0,
            submitted,
            changes: run.applied,
            rounds: run.rounds,
            fired: run.fired,
        };
        Ok(Propagation { entry, report })
    }

    fn propagate(
        &self,
        store: &mut TableStore,
        graph: &BlockGraph,
        run: &mut Run,
        initial: BTreeSet<usize>,
    ) -> Result<(), EngineError> {
        // Queues hold ranks, so popping the smallest follows graph order.
        let mut current = initial;
        let mut next: BTreeSet<usize> = BTreeSet::new();

        while !current.is_empty() {
            if run.rounds == self.max_rounds {
                log::warn!(
                    "propagation did not settle within {} rounds ({} block(s) still scheduled)",
                    self.max_rounds,
                    current.len()
                );
                return Err(EngineError::DivergentTransaction { rounds: self.max_rounds });
            }
            run.rounds += 1;
            let mut fired_this_round: FxHashSet<usize> = FxHashSet::default();

            while let Some(rank) = current.pop_first() {
                let ix = graph.order()[rank];
                let block = graph.block(ix);
                fired_this_round.insert(ix);
                run.fired.push(block.name().to_string());

                let changes = block.evaluate(store).map_err(|message| EngineError::BlockEvaluation {
                    block: block.name().to_string(),
                    message,
                })?;

                for change in changes {
                    let described = format!("{:?}", change);
                    if let Err(reason) = apply_change(store, change, &mut run.applied, &mut run.touched) {
                        log::error!(
                            "block '{}' produced an invalid change {}: {}",
                            block.name(),
                            described,
                            reason
                        );
                        return Err(EngineError::InternalInvariantViolation {
                            block: block.name().to_string(),
                            reason,
                        });
                    }
                }

                // Later-ranked watchers run this round; feedback waits for the next.
                for register in std::mem::take(&mut run.touched) {
                    for watcher in graph.watchers(&register) {
                        let watcher_rank = graph.rank(watcher);
                        if watcher_rank > rank && !fired_this_round.contains(&watcher) {
                            current.insert(watcher_rank);
                        } else {
                            next.insert(watcher_rank);
                        }
                    }
                }
            }

            current = std::mem::take(&mut next);
        }
        Ok(())
    }
}

/// In-flight state of one propagation.
#[derive(Default)]
struct Run {
    applied: Vec<AppliedChange>,
    /// Registers written since the last scheduling pass.
    touched: Vec<Register>,
    rounds: usize,
    fired: Vec<String>,
}

/// Apply one change, logging what was done and which registers it touched.
///
/// Writes that leave the stored value unchanged are not logged.
fn apply_change(
    store: &mut TableStore,
    change: Change,
    applied: &mut Vec<AppliedChange>,
    touched: &mut Vec<Register>,
) -> Result<(), StoreError> {
    match change {
        Change::Set { table, row, column, value } => {
            let index = store.resolve_column(table, column)?;
            let column_id = store
                .table(table)
                .map(|t| t.columns()[index].id)
                .ok_or(StoreError::UnknownTable(table))?;
            if let Some(old) = store.write_cell(table, row, index, value.clone())? {
                applied.push(AppliedChange::Cell { table, row, column: index, old: Some(old), new: value });
                touched.push(Register::column(table, column_id));
            }
        }
        Change::Append { table, rows } => {
            if rows.is_empty() {
                // Still validate the target exists.
                store.table(table).ok_or(StoreError::UnknownTable(table))?;
                return Ok(());
            }
            let range = store.append_rows(table, rows.clone())?;
            for (row, values) in range.zip(rows) {
                for (column, new) in values.into_iter().enumerate() {
                    applied.push(AppliedChange::Cell { table, row, column, old: None, new });
                }
            }
            touched.push(Register::any(table));
        }
        Change::Define { table, name, columns } => {
            if store.contains(table) {
                return Ok(());
            }
            store.create_table(table, &name, columns.clone(), Vec::new())?;
            applied.push(AppliedChange::Created { table, name, columns });
            touched.push(Register::any(table));
        }
    }
    Ok(())
}

/// Rewind an undo buffer, last change first.
fn rollback(store: &mut TableStore, applied: &[AppliedChange]) {
    for change in applied.iter().rev() {
        if let Err(e) = change.revert(store) {
            log::error!("rollback failed for {:?}: {}", change, e);
        }
    }
}
