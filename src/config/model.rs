// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Tuning file as read from TOML.
///
/// ```toml
/// [tailer]
/// chunk_size = 32768
/// appear_retries = 100
///
/// [scheduler]
/// max_sleep_secs = 10
/// backoff = [[5, 1], [50, 5], [500, 30]]
/// backoff_ceiling_secs = 60
///
/// [output]
/// max_output_length = 65535
/// ```
///
/// Every section is optional; the defaults are the values the daemon has
/// always been tuned with.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub tailer: TailerSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub output: OutputSection,
}

/// Validated tuning. Only constructed through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub tailer: TailerSection,
    pub scheduler: SchedulerSection,
    pub output: OutputSection,
}

impl MonitorConfig {
    /// Internal constructor used by validation; skips all checks.
    pub(crate) fn new_unchecked(
        tailer: TailerSection,
        scheduler: SchedulerSection,
        output: OutputSection,
    ) -> Self {
        Self {
            tailer,
            scheduler,
            output,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new_unchecked(
            TailerSection::default(),
            SchedulerSection::default(),
            OutputSection::default(),
        )
    }
}

/// `[tailer]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TailerSection {
    /// Maximum bytes read from a log per poll.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Polls of a missing log before giving up on it.
    #[serde(default = "default_appear_retries")]
    pub appear_retries: u32,

    /// Polls without new data before a log is declared stale.
    #[serde(default = "default_stale_polls")]
    pub stale_polls: u32,

    /// Polls without new data before the engine pid is checked.
    #[serde(default = "default_liveness_after_polls")]
    pub liveness_after_polls: u32,

    /// Polls without new data before a replayed log counts as complete.
    #[serde(default = "default_replay_idle_polls")]
    pub replay_idle_polls: u32,
}

fn default_chunk_size() -> usize {
    32768
}

fn default_appear_retries() -> u32 {
    100
}

fn default_stale_polls() -> u32 {
    17280
}

fn default_liveness_after_polls() -> u32 {
    10
}

fn default_replay_idle_polls() -> u32 {
    5
}

impl Default for TailerSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            appear_retries: default_appear_retries(),
            stale_polls: default_stale_polls(),
            liveness_after_polls: default_liveness_after_polls(),
            replay_idle_polls: default_replay_idle_polls(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Upper bound for one idle sleep of the poll loop.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    /// `[retries_below, sleep_secs]` steps, in increasing order.
    #[serde(default = "default_backoff")]
    pub backoff: Vec<[u64; 2]>,

    /// Sleep used once retries pass the last step.
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,
}

fn default_max_sleep_secs() -> u64 {
    10
}

fn default_backoff() -> Vec<[u64; 2]> {
    vec![[5, 1], [50, 5], [500, 30]]
}

fn default_backoff_ceiling_secs() -> u64 {
    60
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_sleep_secs: default_max_sleep_secs(),
            backoff: default_backoff(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
        }
    }
}

impl SchedulerSection {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    /// Job stdout/stderr text longer than this is cut before it is emitted.
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,
}

fn default_max_output_length() -> usize {
    65535
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            max_output_length: default_max_output_length(),
        }
    }
}

/// Per-invocation switches, mostly straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    pub replay: bool,
    pub keep_state: bool,
    pub skip_stdout: bool,
    pub follow_subworkflows: bool,
    pub events_enabled: bool,
    pub notifications_enabled: bool,
    pub fast_start: bool,
    pub adjust_secs: i64,
    pub sim_millis: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub manifest_override: Option<PathBuf>,
}
