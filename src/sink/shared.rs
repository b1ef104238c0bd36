// src/sink/shared.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use super::{EventSink, StructuredEvent};

/// One destination fed by several workflows. Every handle writes through
/// the same inner sink, so lines never interleave mid-event.
#[derive(Debug, Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn EventSink>>>,
}

impl SharedSink {
    pub fn new(inner: Box<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn EventSink>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for SharedSink {
    fn send(&mut self, event: &StructuredEvent) -> Result<()> {
        self.lock().send(event)
    }

    fn flush(&mut self) -> Result<()> {
        self.lock().flush()
    }

    /// Other workflows may still be writing; only flush here.
    fn close(&mut self) -> Result<()> {
        self.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Fields, MemorySink};

    #[test]
    fn handles_share_one_destination() {
        let memory = MemorySink::new();
        let mut a = SharedSink::new(Box::new(memory.clone()));
        let mut b = a.clone();

        a.send(&StructuredEvent::new("stampede.xwf.start", Fields::new())).unwrap();
        b.send(&StructuredEvent::new("stampede.xwf.end", Fields::new())).unwrap();
        a.close().unwrap();
        b.flush().unwrap();

        assert_eq!(memory.kinds(), vec!["stampede.xwf.start", "stampede.xwf.end"]);
        assert_eq!(memory.flush_count(), 2);
    }
}
