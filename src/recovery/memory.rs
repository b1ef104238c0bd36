// src/recovery/memory.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use super::{RecoveryStore, WorkflowState};
use crate::types::Timestamp;

/// Snapshot of what a [`MemoryRecoveryStore`] holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRecord {
    pub state: Option<WorkflowState>,
    pub progress: Option<u64>,
    pub started: Option<(u32, Timestamp)>,
    pub done: Option<(Timestamp, f64)>,
    pub progress_writes: usize,
}

/// In-memory store. Clones share the same record, so a test can keep a
/// handle, let a workflow end, and start a second one from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecoveryStore {
    inner: Arc<Mutex<MemoryRecord>>,
}

impl MemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: WorkflowState) -> Self {
        let store = Self::default();
        store.record().state = Some(state);
        store
    }

    pub fn with_progress(line: u64) -> Self {
        let store = Self::default();
        store.record().progress = Some(line);
        store
    }

    fn record(&self) -> MutexGuard<'_, MemoryRecord> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> MemoryRecord {
        self.record().clone()
    }
}

impl RecoveryStore for MemoryRecoveryStore {
    fn read_state(&self) -> Result<Option<WorkflowState>> {
        Ok(self.record().state.clone())
    }

    fn write_state(&mut self, state: &WorkflowState) -> Result<()> {
        self.record().state = Some(state.clone());
        Ok(())
    }

    fn read_progress(&self) -> Result<Option<u64>> {
        Ok(self.record().progress)
    }

    fn write_progress(&mut self, line: u64) -> Result<()> {
        let mut record = self.record();
        record.progress = Some(line);
        record.progress_writes += 1;
        Ok(())
    }

    fn clear_progress(&mut self) -> Result<()> {
        self.record().progress = None;
        Ok(())
    }

    fn mark_started(&mut self, pid: u32, ts: Timestamp) -> Result<()> {
        let mut record = self.record();
        record.started = Some((pid, ts));
        record.done = None;
        Ok(())
    }

    fn mark_done(&mut self, ts: Timestamp, duration: f64) -> Result<()> {
        self.record().done = Some((ts, duration));
        Ok(())
    }
}
