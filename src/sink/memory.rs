// src/sink/memory.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use super::{EventSink, StructuredEvent};
use crate::errors::MonitordError;

/// Keeps events in memory. Clones share the same buffer so a test can
/// inspect what the scheduler sent.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<StructuredEvent>>>,
    /// Sends succeed until this many events were accepted.
    accept_limit: Option<usize>,
    flushes: Arc<Mutex<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that fails every send after `limit` accepted events.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StructuredEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<StructuredEvent> {
        self.lock().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<StructuredEvent> {
        self.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for MemorySink {
    fn send(&mut self, event: &StructuredEvent) -> Result<()> {
        let mut events = self.lock();
        if self.accept_limit.is_some_and(|limit| events.len() >= limit) {
            return Err(MonitordError::SinkError("memory sink refused event".into()).into());
        }
        events.push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
