// src/sink/mod.rs

//! Destination for the structured event stream.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::errors::MonitordError;

mod jsonl;
mod memory;
mod shared;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;
pub use shared::SharedSink;

/// Default event file name inside a run directory.
pub const EVENTS_FILE: &str = "monitord.events.jsonl";

/// Payload of one event, keyed by netlogger-style field names.
pub type Fields = BTreeMap<String, Value>;

/// The unit handed to a sink. Serializes as one flat object with the
/// kind under `event`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredEvent {
    #[serde(rename = "event")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl StructuredEvent {
    pub fn new(kind: impl Into<String>, fields: Fields) -> Self {
        Self {
            kind: kind.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Ordered, possibly buffering event destination. Failures are surfaced
/// so the caller can stop sending without crashing.
pub trait EventSink: Send + Debug {
    fn send(&mut self, event: &StructuredEvent) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Resolve a `--dest` value to the file it names. Only `file://` URLs
/// and plain paths are understood.
pub fn destination_path(dest: &str) -> Result<PathBuf> {
    if let Some(path) = dest.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = dest.split_once("://") {
        return Err(MonitordError::ConfigError(format!("unsupported event destination scheme '{scheme}'")).into());
    }
    Ok(PathBuf::from(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_flat() {
        let mut fields = Fields::new();
        fields.insert("xwf__id".into(), "abc".into());
        fields.insert("ts".into(), 12.into());
        let event = StructuredEvent::new("stampede.xwf.start", fields);
        let line = serde_json::to_string(&event).unwrap();
        assert_eq!(line, r#"{"event":"stampede.xwf.start","ts":12,"xwf__id":"abc"}"#);
    }

    #[test]
    fn destinations() {
        assert_eq!(destination_path("file:///tmp/e.jsonl").unwrap(), PathBuf::from("/tmp/e.jsonl"));
        assert_eq!(destination_path("out/e.jsonl").unwrap(), PathBuf::from("out/e.jsonl"));
        assert!(destination_path("amqp://broker/x").is_err());
    }
}
