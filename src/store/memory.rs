// src/store/memory.rs

use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::impl_store;
use crate::store::records::{RecoveryReport, TaskRecord};
use crate::store::state::StoreState;

/// Records kept in memory; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.lock())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> Result<R>) -> Result<R> {
        f(&mut self.state.lock())
    }

    fn mutate_tasks(
        &self,
        _changed: &[TaskRecord],
        f: impl FnOnce(&mut StoreState) -> Result<()>,
    ) -> Result<()> {
        f(&mut self.state.lock())
    }

    fn recover(&self) -> Result<RecoveryReport> {
        Ok(self.state.lock().recover_interrupted())
    }
}

impl_store!(MemoryStore);
