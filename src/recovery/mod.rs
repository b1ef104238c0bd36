// src/recovery/mod.rs

//! Per-workflow persistence that lets a restarted daemon pick up where
//! the previous one stopped.
//!
//! Two records matter:
//! - the state file, rewritten when a workflow ends cleanly: job sequence,
//!   last processed line, engine restarts and the per-job attempt counters;
//! - the recover file, rewritten after every processed chunk and deleted on
//!   a clean end. Its presence means the last run died mid-stream.
//!
//! The started/done marker files exist for outside tooling only.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::types::Timestamp;

mod file;
mod memory;
pub mod pid_file;
pub mod retries;

pub use file::FileRecoveryStore;
pub use memory::MemoryRecoveryStore;
pub use pid_file::PidFile;
pub use retries::SubworkflowRetries;

pub const STATE_FILE: &str = "monitord.info";
pub const RECOVER_FILE: &str = "monitord.recover";
pub const STARTED_FILE: &str = "monitord.started";
pub const DONE_FILE: &str = "monitord.done";
pub const PID_FILE: &str = "monitord.pid";
pub const RETRIES_FILE: &str = "monitord.subwf";

const KEY_JOB_SEQUENCE: &str = "monitord_job_sequence";
const KEY_LINE: &str = "monitord_dagman_out_sequence";
const KEY_RESTARTS: &str = "monitound_workflow_restart_count";
const KEY_RESTARTS_ALT: &str = "monitord_workflow_restart_count";
const KEY_LINE_PROCESSED: &str = "line_processed";

/// Everything the state file holds for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    /// Next job submit sequence to hand out.
    pub job_sequence: u32,
    /// Last log line fully processed.
    pub last_line: u64,
    pub restart_count: i64,
    /// Attempt counter per job id.
    pub job_counters: BTreeMap<String, u32>,
}

impl WorkflowState {
    pub fn render(&self) -> String {
        let mut out = format!(
            "{KEY_JOB_SEQUENCE} {}\n{KEY_LINE} {}\n{KEY_RESTARTS} {}\n",
            self.job_sequence, self.last_line, self.restart_count
        );
        for (job, count) in &self.job_counters {
            out.push_str(&format!("{job} {count}\n"));
        }
        out
    }

    /// Parse a state file. Malformed lines are skipped.
    pub fn parse(text: &str) -> WorkflowState {
        let mut state = WorkflowState::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            let key = key.trim();
            let Ok(count) = value.trim().parse::<i64>() else {
                tracing::error!(line, "malformed line in state file");
                continue;
            };
            match key {
                KEY_JOB_SEQUENCE => state.job_sequence = count.max(0) as u32,
                KEY_LINE => state.last_line = count.max(0) as u64,
                KEY_RESTARTS | KEY_RESTARTS_ALT => state.restart_count = count,
                job => {
                    state.job_counters.insert(job.to_string(), count.max(0) as u32);
                }
            }
        }
        state
    }
}

/// Where one workflow keeps its recovery files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPaths {
    pub state: PathBuf,
    pub recover: PathBuf,
    pub started: PathBuf,
    pub done: PathBuf,
}

impl RecoveryPaths {
    /// Files sit in the run directory, or in `output_dir` with a
    /// `<uuid>-` prefix.
    pub fn new(run_dir: &Path, output_dir: Option<&Path>, wf_uuid: &str) -> Self {
        let place = |name: &str| match output_dir {
            Some(dir) => dir.join(format!("{wf_uuid}-{name}")),
            None => run_dir.join(name),
        };
        Self {
            state: place(STATE_FILE),
            recover: place(RECOVER_FILE),
            started: place(STARTED_FILE),
            done: place(DONE_FILE),
        }
    }
}

/// Durable per-workflow key/value records. Each store has exactly one
/// owner, the workflow it belongs to.
pub trait RecoveryStore: Send + Debug {
    fn read_state(&self) -> Result<Option<WorkflowState>>;
    fn write_state(&mut self, state: &WorkflowState) -> Result<()>;

    /// Line recorded in the recover file, if one exists.
    fn read_progress(&self) -> Result<Option<u64>>;
    fn write_progress(&mut self, line: u64) -> Result<()>;
    fn clear_progress(&mut self) -> Result<()>;

    /// Record the daemon's start and drop any stale done marker.
    fn mark_started(&mut self, pid: u32, ts: Timestamp) -> Result<()>;
    /// Record a clean finish and how long the daemon ran, in seconds.
    fn mark_done(&mut self, ts: Timestamp, duration: f64) -> Result<()>;
}

fn parse_progress(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(' ')?;
        (key == KEY_LINE_PROCESSED).then(|| value.trim().parse().ok()).flatten()
    })
}

fn render_progress(line: u64) -> String {
    format!("{KEY_LINE_PROCESSED} {line}\n")
}
