//! Shared handle to a Core for callers on several threads.
//!
//! The Core itself is single-owner. `SharedCore` serializes access behind
//! one lock, so a queue-then-commit sequence done inside [`SharedCore::with`]
//! cannot interleave with another thread's.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tabflow_core::Value;

use crate::change::HistoryEntry;
use crate::core::{Core, Mode};
use crate::error::EngineError;

#[derive(Clone, Default)]
pub struct SharedCore {
    inner: Arc<Mutex<Core>>,
}

impl SharedCore {
    pub fn new(core: Core) -> Self {
        Self { inner: Arc::new(Mutex::new(core)) }
    }

    /// Exclusive access until the guard drops.
    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let mut core = self.inner.lock();
        f(&mut core)
    }

    pub fn compile(&self, program_text: &str) -> Result<(), EngineError> {
        self.with(|core| core.compile(program_text))
    }

    /// Queue a batch of cell writes and commit them as one transaction.
    ///
    /// If any write is refused while queueing, nothing from the batch stays
    /// buffered.
    pub fn transact(
        &self,
        name: &str,
        writes: &[(u64, u64, Value)],
    ) -> Result<Option<Arc<HistoryEntry>>, EngineError> {
        self.with(|core| {
            for (row, column, value) in writes {
                if let Err(e) = core.queue_change(name, *row, *column, value.clone()) {
                    core.discard_pending();
                    return Err(e);
                }
            }
            core.process_transaction()
        })
    }

    pub fn get_column(&self, table_id: u64, column: u64) -> Result<Vec<Value>, EngineError> {
        self.inner.lock().get_column(table_id, column)
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().mode()
    }

    pub fn fingerprint(&self) -> String {
        self.inner.lock().fingerprint()
    }
}

impl std::fmt::Debug for SharedCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedCore").field(&*self.inner.lock()).finish()
    }
}
