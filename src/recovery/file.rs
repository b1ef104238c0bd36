// src/recovery/file.rs

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use super::{RecoveryPaths, RecoveryStore, WorkflowState, parse_progress, render_progress};
use crate::fs::FileSystem;
use crate::grammar::isodate;
use crate::types::Timestamp;

/// Recovery records as plain text files next to the workflow.
#[derive(Debug, Clone)]
pub struct FileRecoveryStore {
    fs: Arc<dyn FileSystem>,
    paths: RecoveryPaths,
}

impl FileRecoveryStore {
    pub fn new(fs: Arc<dyn FileSystem>, paths: RecoveryPaths) -> Self {
        Self { fs, paths }
    }

    pub fn paths(&self) -> &RecoveryPaths {
        &self.paths
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        if !self.fs.exists(path) {
            return Ok(None);
        }
        self.fs.read_to_string(path).map(Some)
    }
}

impl RecoveryStore for FileRecoveryStore {
    fn read_state(&self) -> Result<Option<WorkflowState>> {
        let Some(text) = self.read_optional(&self.paths.state)? else {
            info!(path = %self.paths.state.display(), "no state file, continuing without state");
            return Ok(None);
        };
        Ok(Some(WorkflowState::parse(&text)))
    }

    fn write_state(&mut self, state: &WorkflowState) -> Result<()> {
        self.fs.write(&self.paths.state, state.render().as_bytes())
    }

    fn read_progress(&self) -> Result<Option<u64>> {
        let Some(text) = self.read_optional(&self.paths.recover)? else {
            return Ok(None);
        };
        let line = parse_progress(&text);
        if let Some(line) = line {
            info!(line, "monitord last processed line");
        }
        Ok(line)
    }

    fn write_progress(&mut self, line: u64) -> Result<()> {
        self.fs.write(&self.paths.recover, render_progress(line).as_bytes())
    }

    fn clear_progress(&mut self) -> Result<()> {
        debug!(path = %self.paths.recover.display(), "removing recover file");
        self.fs.remove_file(&self.paths.recover)
    }

    fn mark_started(&mut self, pid: u32, ts: Timestamp) -> Result<()> {
        let body = format!("pid {pid}\ntimestamp {}\n", isodate(ts));
        self.fs.write(&self.paths.started, body.as_bytes())?;
        self.fs.remove_file(&self.paths.done)
    }

    fn mark_done(&mut self, ts: Timestamp, duration: f64) -> Result<()> {
        let body = format!("{} {:.3}\n", isodate(ts), duration);
        self.fs.write(&self.paths.done, body.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn lifecycle_markers_and_progress() {
        let mock = MockFileSystem::new();
        mock.add_file("/run/monitord.done", "old");
        let fs: Arc<dyn FileSystem> = Arc::new(mock.clone());
        let mut store = FileRecoveryStore::new(fs.clone(), RecoveryPaths::new(Path::new("/run"), None, "wf"));

        assert_eq!(store.read_progress().unwrap(), None);
        assert_eq!(store.read_state().unwrap(), None);

        store.mark_started(321, 0).unwrap();
        assert!(!fs.exists(Path::new("/run/monitord.done")));
        let started = fs.read_to_string(Path::new("/run/monitord.started")).unwrap();
        assert!(started.starts_with("pid 321\ntimestamp "));

        store.write_progress(17).unwrap();
        assert_eq!(store.read_progress().unwrap(), Some(17));
        store.clear_progress().unwrap();
        assert!(!fs.exists(&PathBuf::from("/run/monitord.recover")));

        store.mark_done(0, 1.5).unwrap();
        let done = fs.read_to_string(Path::new("/run/monitord.done")).unwrap();
        assert!(done.trim_end().ends_with(" 1.500"));
    }
}
