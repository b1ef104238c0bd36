// src/workflow/jobstate_log.rs

//! Plain-text audit trail of every job state change, one line each.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::fs::{self, FileSystem};
use crate::types::Timestamp;

pub const JOBSTATE_FILE: &str = "jobstate.log";

#[derive(Debug, Clone)]
pub struct JobstateLog {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl JobstateLog {
    /// Open the log for appending, or move the existing one aside first
    /// when `rotate` is set.
    pub fn open(fs: Arc<dyn FileSystem>, path: PathBuf, rotate: bool) -> Result<Self> {
        if rotate {
            if let Some(old) = fs::rotate_file(fs.as_ref(), &path)? {
                info!(path = %path.display(), rotated = %old.display(), "rotated jobstate log");
            }
            fs.write(&path, b"")?;
        } else {
            if !fs.exists(&path) {
                info!(path = %path.display(), "creating new jobstate log");
            }
            fs.append(&path, b"")?;
        }
        Ok(Self { fs, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<ts> <job> <state> <status|sched_id|-> <site|-> <walltime|-> <seq|->`
    pub fn job_line(
        &self,
        ts: Timestamp,
        job: &str,
        state: &str,
        detail: Option<&str>,
        site: Option<&str>,
        walltime: Option<i64>,
        seq: Option<u32>,
    ) {
        let line = format!(
            "{} {} {} {} {} {} {}",
            ts,
            job,
            state,
            detail.unwrap_or("-"),
            site.unwrap_or("-"),
            walltime.map_or_else(|| "-".to_string(), |w| w.to_string()),
            seq.map_or_else(|| "-".to_string(), |s| s.to_string()),
        );
        debug!(line = %line, "new state");
        self.write(&line);
    }

    /// `<ts> INTERNAL *** <marker> ***`
    pub fn internal(&self, ts: Timestamp, marker: &str) {
        self.write(&format!("{ts} INTERNAL *** {marker} ***"));
    }

    fn write(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        if let Err(err) = self.fs.append(&self.path, &bytes) {
            warn!(path = %self.path.display(), error = %err, "cannot write to jobstate log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn lines_use_dashes_for_missing_columns() {
        let mock = MockFileSystem::new();
        let fs: Arc<dyn FileSystem> = Arc::new(mock.clone());
        let log = JobstateLog::open(fs.clone(), PathBuf::from("/run/jobstate.log"), false).unwrap();
        log.internal(100, "MONITORD_STARTED");
        log.job_line(101, "j1", "SUBMIT", Some("12.0"), Some("local"), None, Some(1));
        log.job_line(102, "j1", "UN_READY", None, None, Some(3600), None);

        let text = fs.read_to_string(Path::new("/run/jobstate.log")).unwrap();
        assert_eq!(
            text,
            "100 INTERNAL *** MONITORD_STARTED ***\n101 j1 SUBMIT 12.0 local - 1\n102 j1 UN_READY - - 3600 -\n"
        );
    }

    #[test]
    fn rotation_keeps_previous_log() {
        let mock = MockFileSystem::new();
        mock.add_file("/run/jobstate.log", "old\n");
        let fs: Arc<dyn FileSystem> = Arc::new(mock.clone());
        let log = JobstateLog::open(fs.clone(), PathBuf::from("/run/jobstate.log"), true).unwrap();
        log.internal(5, "MONITORD_STARTED");

        assert_eq!(fs.read_to_string(Path::new("/run/jobstate.log.000")).unwrap(), "old\n");
        assert_eq!(
            fs.read_to_string(log.path()).unwrap(),
            "5 INTERNAL *** MONITORD_STARTED ***\n"
        );
    }
}
