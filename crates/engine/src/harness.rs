//! Test harness for Core scenarios with event tracking.
//!
//! `CoreHarness` wraps a [`Core`] running the bouncing-ball program and
//! records every event it emits, so tests can check ordering without a
//! real client.

use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_config::Settings;
use tabflow_core::{hash_name, Value};

use crate::change::HistoryEntry;
use crate::core::Core;
use crate::error::EngineError;
use crate::events::{CoreEvent, EventCollector};

/// Ball moved by a timer tick.
pub const BALL: &str = "\
-- Environment
#ball = [x y vx vy | 0 0 1 1]
#system/timer = [resolution: 15, tick: 0]

-- Move on every tick
~ #system/timer.tick
#ball.x := #ball.x + #ball.vx
#ball.y := #ball.y + #ball.vy
";

/// Core with [`BALL`] loaded and default settings.
pub fn ball_core() -> Core {
    ball_core_with(Settings::default())
}

pub fn ball_core_with(settings: Settings) -> Core {
    let mut core = Core::with_settings(settings);
    if let Err(e) = core.compile(BALL) {
        panic!("ball program failed to compile: {}", e);
    }
    core
}

/// Commit one timer tick.
pub fn tick(core: &mut Core, n: u32) -> Option<Arc<HistoryEntry>> {
    core.queue_change("system/timer", 1, hash_name("tick"), Value::Number(n as f64))
        .unwrap();
    core.process_transaction().unwrap()
}

fn number(core: &Core, row: usize, column: &str) -> f64 {
    match core.cell("ball", row, column) {
        Ok(Value::Number(n)) => n,
        other => panic!("ball.{} row {}: {:?}", column, row, other),
    }
}

/// `(x, y, vx, vy)` of ball row 1.
pub fn ball_row(core: &Core) -> (f64, f64, f64, f64) {
    ball_row_at(core, 1)
}

pub fn ball_row_at(core: &Core, row: usize) -> (f64, f64, f64, f64) {
    (
        number(core, row, "x"),
        number(core, row, "y"),
        number(core, row, "vx"),
        number(core, row, "vy"),
    )
}

/// Core plus the events it has emitted.
pub struct CoreHarness {
    pub core: Core,
    events: Arc<Mutex<EventCollector>>,
}

impl CoreHarness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let events = Arc::new(Mutex::new(EventCollector::new()));
        let mut core = Core::with_settings(settings);
        let sink = Arc::clone(&events);
        core.subscribe(move |event: &CoreEvent| sink.lock().push(event.clone()));
        if let Err(e) = core.compile(BALL) {
            panic!("ball program failed to compile: {}", e);
        }
        Self { core, events }
    }

    pub fn tick(&mut self, n: u32) -> Option<Arc<HistoryEntry>> {
        tick(&mut self.core, n)
    }

    pub fn try_tick(&mut self, n: u32) -> Result<Option<Arc<HistoryEntry>>, EngineError> {
        self.core.queue_change("system/timer", 1, hash_name("tick"), Value::Number(n as f64))?;
        self.core.process_transaction()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().events().to_vec()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn committed_count(&self) -> usize {
        self.events.lock().committed().len()
    }

    pub fn cells_changed_count(&self) -> usize {
        self.events.lock().cells_changed().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_config::PausedCommits;

    #[test]
    fn test_load_emits_program_loaded() {
        let h = CoreHarness::new();
        let events = h.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], CoreEvent::ProgramLoaded(e) if e.tables == 2 && e.blocks == 1));
    }

    #[test]
    fn test_commit_emits_in_order() {
        let mut h = CoreHarness::new();
        h.clear_events();
        h.tick(1);

        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CoreEvent::TransactionCommitted(e) if e.seq == 1 && e.submitted == 1));
        match &events[1] {
            CoreEvent::CellsChanged(e) => {
                assert_eq!(e.seq, 1);
                // tick, x, y
                assert_eq!(e.cells.len(), 3);
            }
            other => panic!("expected CellsChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_noop_emits_nothing() {
        let mut h = CoreHarness::new();
        h.clear_events();
        h.core.queue_change("ball", 1, hash_name("vx"), Value::Number(1.0)).unwrap();
        assert_eq!(h.core.process_transaction(), Ok(None));
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_failed_commit_emits_nothing() {
        let mut h = CoreHarness::new();
        h.clear_events();
        h.core.queue_change("ball", 1, hash_name("x"), Value::Text("left".into())).unwrap();
        assert!(h.core.process_transaction().is_err());
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_steps_emit_cursor_and_cells() {
        let mut h = CoreHarness::new();
        h.tick(1);
        h.tick(2);
        h.core.pause().unwrap();
        h.clear_events();

        h.core.step_back_one().unwrap();
        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CoreEvent::CursorMoved(e) if e.cursor == 1 && e.previous == 2 && e.len == 2));
        assert!(matches!(&events[1], CoreEvent::CellsChanged(e) if e.seq == 2));
    }

    #[test]
    fn test_paused_append_hides_cells() {
        let mut h = CoreHarness::new();
        h.tick(1);
        h.core.pause().unwrap();
        h.clear_events();

        h.tick(2);
        assert_eq!(h.committed_count(), 1);
        assert_eq!(h.cells_changed_count(), 0);
        assert_eq!(ball_row(&h.core), (1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn test_paused_reject() {
        let settings = Settings { paused_commits: PausedCommits::Reject, ..Settings::default() };
        let mut h = CoreHarness::with_settings(settings);
        h.tick(1);
        h.core.pause().unwrap();
        assert_eq!(h.try_tick(2), Err(EngineError::CommitWhilePaused));
        assert_eq!(h.core.pending_len(), 0);
        assert_eq!(h.core.history_len(), 1);
    }
}
