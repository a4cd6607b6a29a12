//! Reversible transaction history with a time-travel cursor.

use std::sync::Arc;

use crate::change::HistoryEntry;
use crate::error::EngineError;
use crate::store::TableStore;

/// Ordered, truncatable list of committed entries plus a cursor.
///
/// Cursor 0 is the baseline; cursor `n` means entries `1..=n` are applied to
/// the store.
#[derive(Debug)]
pub struct History {
    entries: Vec<Arc<HistoryEntry>>,
    cursor: usize,
    paused: bool,
    max_entries: Option<usize>,
    next_seq: u64,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// History keeping at most `max_entries` entries. The oldest are evicted
    /// first and the earliest surviving state becomes the baseline.
    pub fn with_limit(max_entries: Option<usize>) -> Self {
        Self { entries: Vec::new(), cursor: 0, paused: false, max_entries, next_seq: 1 }
    }

    /// Record a committed entry.
    ///
    /// Entries after the cursor are discarded; the cursor moves to the tip.
    pub fn record(&mut self, mut entry: HistoryEntry) -> Arc<HistoryEntry> {
        entry.seq = self.next_seq;
        self.next_seq += 1;

        let discarded = self.entries.len() - self.cursor;
        if discarded > 0 {
            log::debug!("history: discarding {} redo entries", discarded);
            self.entries.truncate(self.cursor);
        }

        let entry = Arc::new(entry);
        self.entries.push(Arc::clone(&entry));
        self.cursor = self.entries.len();

        if let Some(max) = self.max_entries {
            if self.entries.len() > max {
                let evicted = self.entries.len() - max;
                self.entries.drain(..evicted);
                self.cursor -= evicted;
            }
        }
        entry
    }

    /// Undo the entry under the cursor. Only valid while paused.
    pub fn step_back_one(&mut self, store: &mut TableStore) -> Result<(), EngineError> {
        if !self.paused {
            return Err(EngineError::NotPaused);
        }
        self.back(store)
    }

    /// Redo the entry after the cursor. Only valid while paused.
    pub fn step_forward_one(&mut self, store: &mut TableStore) -> Result<(), EngineError> {
        if !self.paused {
            return Err(EngineError::NotPaused);
        }
        self.forward(store)
    }

    /// Move the cursor to `position`, stepping through every entry between.
    pub fn seek(&mut self, store: &mut TableStore, position: usize) -> Result<(), EngineError> {
        if position > self.entries.len() {
            return Err(EngineError::AtNewestEntry);
        }
        while self.cursor > position {
            self.back(store)?;
        }
        while self.cursor < position {
            self.forward(store)?;
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Leave time travel, snapping the store to the newest state.
    pub fn resume(&mut self, store: &mut TableStore) -> Result<(), EngineError> {
        self.seek(store, self.entries.len())?;
        self.paused = false;
        Ok(())
    }

    fn back(&mut self, store: &mut TableStore) -> Result<(), EngineError> {
        if self.cursor == 0 {
            return Err(EngineError::AtOldestEntry);
        }
        let entry = Arc::clone(&self.entries[self.cursor - 1]);
        for change in entry.changes.iter().rev() {
            change.revert(store)?;
        }
        self.cursor -= 1;
        Ok(())
    }

    fn forward(&mut self, store: &mut TableStore) -> Result<(), EngineError> {
        if self.cursor == self.entries.len() {
            return Err(EngineError::AtNewestEntry);
        }
        let entry = Arc::clone(&self.entries[self.cursor]);
        for change in &entry.changes {
            change.replay(store)?;
        }
        self.cursor += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn at_tip(&self) -> bool {
        self.cursor == self.entries.len()
    }

    pub fn entries(&self) -> &[Arc<HistoryEntry>] {
        &self.entries
    }

    /// Entry most recently applied, if any.
    pub fn current(&self) -> Option<&Arc<HistoryEntry>> {
        self.cursor.checked_sub(1).map(|i| &self.entries[i])
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Forget every entry. The current store state becomes the baseline.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.paused = false;
        self.next_seq = 1;
    }
}
