//! Compiled reactive blocks.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::change::{Change, Register};
use crate::store::TableStore;

/// Evaluation routine of a block.
///
/// Reads committed table state and returns the changes the block wants made.
/// Must be pure: identical table contents give identical changes.
pub trait BlockRoutine: Send + Sync {
    fn evaluate(&self, tables: &TableStore) -> Result<Vec<Change>, String>;
}

impl<F> BlockRoutine for F
where
    F: Fn(&TableStore) -> Result<Vec<Change>, String> + Send + Sync,
{
    fn evaluate(&self, tables: &TableStore) -> Result<Vec<Change>, String> {
        self(tables)
    }
}

/// When a block runs besides reacting to its watch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Only when a watched register changes.
    OnWatch,
    /// Also once when the program loads.
    OnLoad,
}

#[derive(Clone)]
pub struct Block {
    name: String,
    watch: Vec<Register>,
    produce: Vec<Register>,
    activation: Activation,
    routine: Arc<dyn BlockRoutine>,
}

impl Block {
    pub fn new(name: impl Into<String>, routine: impl BlockRoutine + 'static) -> Self {
        Self {
            name: name.into(),
            watch: Vec::new(),
            produce: Vec::new(),
            activation: Activation::OnWatch,
            routine: Arc::new(routine),
        }
    }

    /// Block whose routine is a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TableStore) -> Result<Vec<Change>, String> + Send + Sync + 'static,
    {
        Self::new(name, f)
    }

    pub fn watching(mut self, register: Register) -> Self {
        if !self.watch.contains(&register) {
            self.watch.push(register);
        }
        self
    }

    pub fn producing(mut self, register: Register) -> Self {
        if !self.produce.contains(&register) {
            self.produce.push(register);
        }
        self
    }

    pub fn on_load(mut self) -> Self {
        self.activation = Activation::OnLoad;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn watch(&self) -> &[Register] {
        &self.watch
    }

    pub fn produce(&self) -> &[Register] {
        &self.produce
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// True if this block watches something `register` can change.
    pub fn watches(&self, register: &Register) -> bool {
        self.watch.iter().any(|w| register.overlaps(w))
    }

    pub fn evaluate(&self, tables: &TableStore) -> Result<Vec<Change>, String> {
        self.routine.evaluate(tables)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.name)
            .field("watch", &self.watch)
            .field("produce", &self.produce)
            .field("activation", &self.activation)
            .finish()
    }
}
