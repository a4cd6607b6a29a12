//! Event types for Core change notifications.
//!
//! Subscribers learn about commits, cell changes and time-travel moves
//! without polling. The test harness also uses them to check ordering.

use serde::Serialize;
use tabflow_core::Ident;

use crate::change::AppliedChange;

/// Events emitted by the Core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A program was installed (compiled or loaded).
    ProgramLoaded(ProgramLoadedEvent),

    /// A transaction was committed and recorded.
    TransactionCommitted(TransactionCommittedEvent),

    /// Cells changed from a commit or a history step.
    CellsChanged(CellsChangedEvent),

    /// The history cursor moved. Emitted once per step, seek or resume.
    CursorMoved(CursorMovedEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramLoadedEvent {
    pub tables: usize,
    pub blocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionCommittedEvent {
    /// Sequence number of the recorded entry.
    pub seq: u64,
    pub submitted: usize,
    pub rounds: usize,
    pub changes: usize,
}

/// One addressed cell (0-based row and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellAddress {
    pub table: Ident,
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellsChangedEvent {
    /// Entry that produced (or, when stepping back, was undone for) the change.
    pub seq: u64,
    /// Changed cells, deduplicated, in first-touch order.
    pub cells: Vec<CellAddress>,
    /// Tables created or dropped.
    pub tables: Vec<Ident>,
}

impl CellsChangedEvent {
    pub fn from_changes(seq: u64, changes: &[AppliedChange]) -> Self {
        let mut cells = Vec::new();
        let mut tables = Vec::new();
        for change in changes {
            match change {
                AppliedChange::Cell { table, row, column, .. } => {
                    let addr = CellAddress { table: *table, row: *row, column: *column };
                    if !cells.contains(&addr) {
                        cells.push(addr);
                    }
                }
                AppliedChange::Created { table, .. } => tables.push(*table),
            }
        }
        Self { seq, cells, tables }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorMovedEvent {
    pub cursor: usize,
    pub previous: usize,
    /// History length at the time of the move.
    pub len: usize,
}

/// Callback type for receiving Core events.
pub type EventCallback = Box<dyn FnMut(&CoreEvent) + Send>;

/// Simple event collector for testing.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<CoreEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: CoreEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[CoreEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn committed(&self) -> Vec<&TransactionCommittedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::TransactionCommitted(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn cells_changed(&self) -> Vec<&CellsChangedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::CellsChanged(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn cursor_moved(&self) -> Vec<&CursorMovedEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::CursorMoved(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}
