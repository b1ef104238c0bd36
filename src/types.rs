// src/types.rs

//! Small shared types and process-wide constants.

/// Seconds since the Unix epoch, as carried by every event.
pub type Timestamp = i64;

/// Process exit status for a normal run.
pub const EXIT_OK: i32 = 0;

/// Fatal configuration or I/O problem, or a stop signal.
pub const EXIT_FAILURE: i32 = 1;

/// Status recorded for a workflow-engine run that vanished without
/// reporting its own exit code.
pub const UNKNOWN_FAILURE_CODE: i32 = 2;

/// The monitored engine process went away while its log was idle.
pub const EXIT_LOST_CONTACT: i32 = 42;

/// Another daemon is already attached to the same log.
pub const EXIT_ALREADY_RUNNING: i32 = 43;

/// Suffix every engine progress log carries.
pub const DAGMAN_OUT_SUFFIX: &str = ".dagman.out";

/// Lifecycle of a tracked workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Unstarted,
    Running,
    Ended,
}

/// How a tracked run left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The engine reported its own exit code and the log went quiet.
    Finished,
    /// Replay reached the end of a complete log.
    ReplayComplete,
    /// The log never appeared.
    NeverAppeared,
    /// The log shrank between two polls.
    Truncated,
    /// No new data for too long.
    Stale,
    /// The engine process is gone.
    LostContact,
    /// The daemon was asked to stop.
    Interrupted,
}

impl EndReason {
    /// Internal exit status recorded for a run that ended this way.
    pub fn exit_code(self) -> i32 {
        match self {
            EndReason::Finished | EndReason::ReplayComplete => EXIT_OK,
            EndReason::LostContact => EXIT_LOST_CONTACT,
            EndReason::NeverAppeared
            | EndReason::Truncated
            | EndReason::Stale
            | EndReason::Interrupted => EXIT_FAILURE,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            EndReason::Finished => "workflow engine finished",
            EndReason::ReplayComplete => "replay reached end of log",
            EndReason::NeverAppeared => "log file never appeared",
            EndReason::Truncated => "log file was truncated",
            EndReason::Stale => "log file went stale",
            EndReason::LostContact => "workflow engine process is gone",
            EndReason::Interrupted => "monitord was interrupted",
        }
    }
}
