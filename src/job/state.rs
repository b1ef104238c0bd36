// src/job/state.rs

//! Job states as named by the engine log, and the wait-status helpers used
//! for every exit code stored on a job instance.

use std::fmt;

macro_rules! job_states {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// State of one job instance.
        ///
        /// Known engine states get their own variant; anything else the log
        /// reports is carried through by name.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum JobState {
            $($variant,)+
            Other(String),
        }

        impl JobState {
            pub fn as_str(&self) -> &str {
                match self {
                    $(JobState::$variant => $name,)+
                    JobState::Other(name) => name.as_str(),
                }
            }

            /// Map an engine state name (as in `ULOG_<NAME>`) onto a state.
            pub fn from_name(name: &str) -> JobState {
                match name {
                    $($name => JobState::$variant,)+
                    other => JobState::Other(other.to_string()),
                }
            }
        }
    };
}

job_states! {
    UnReady => "UN_READY",
    PreScriptStarted => "PRE_SCRIPT_STARTED",
    PreScriptTerminated => "PRE_SCRIPT_TERMINATED",
    PreScriptSuccess => "PRE_SCRIPT_SUCCESS",
    PreScriptFailure => "PRE_SCRIPT_FAILURE",
    DagmanSubmit => "DAGMAN_SUBMIT",
    Submit => "SUBMIT",
    SubmitFailed => "SUBMIT_FAILED",
    GridSubmit => "GRID_SUBMIT",
    GridSubmitFailed => "GRID_SUBMIT_FAILED",
    GlobusSubmit => "GLOBUS_SUBMIT",
    GlobusSubmitFailed => "GLOBUS_SUBMIT_FAILED",
    Execute => "EXECUTE",
    ExecutableError => "EXECUTABLE_ERROR",
    Checkpointed => "CHECKPOINTED",
    JobEvicted => "JOB_EVICTED",
    JobTerminated => "JOB_TERMINATED",
    ImageSize => "IMAGE_SIZE",
    ShadowException => "SHADOW_EXCEPTION",
    Generic => "GENERIC",
    JobAborted => "JOB_ABORTED",
    JobSuspended => "JOB_SUSPENDED",
    JobUnsuspended => "JOB_UNSUSPENDED",
    JobHeld => "JOB_HELD",
    JobHeldReason => "JOB_HELD_REASON",
    JobReleased => "JOB_RELEASED",
    NodeExecute => "NODE_EXECUTE",
    NodeTerminated => "NODE_TERMINATED",
    RemoteError => "REMOTE_ERROR",
    GlobusResourceUp => "GLOBUS_RESOURCE_UP",
    GlobusResourceDown => "GLOBUS_RESOURCE_DOWN",
    GridResourceUp => "GRID_RESOURCE_UP",
    GridResourceDown => "GRID_RESOURCE_DOWN",
    JobAdInformation => "JOB_AD_INFORMATION",
    JobSuccess => "JOB_SUCCESS",
    JobFailure => "JOB_FAILURE",
    PostScriptStarted => "POST_SCRIPT_STARTED",
    PostScriptTerminated => "POST_SCRIPT_TERMINATED",
    PostScriptSuccess => "POST_SCRIPT_SUCCESS",
    PostScriptFailure => "POST_SCRIPT_FAILURE",
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobState {
    /// States reached before the engine hands the job to the scheduler.
    /// Site and walltime are not reported for them.
    pub fn is_unsubmitted(&self) -> bool {
        matches!(
            self,
            JobState::UnReady
                | JobState::PreScriptStarted
                | JobState::PreScriptSuccess
                | JobState::PreScriptFailure
        )
    }

    /// States in which an arriving submission reuses the current attempt.
    pub fn accepts_resubmission(&self) -> bool {
        matches!(self, JobState::PreScriptSuccess | JobState::DagmanSubmit)
    }

    pub fn is_submit_failure(&self) -> bool {
        matches!(
            self,
            JobState::SubmitFailed | JobState::GridSubmitFailed | JobState::GlobusSubmitFailed
        )
    }

    pub fn is_held(&self) -> bool {
        matches!(self, JobState::JobHeld | JobState::JobHeldReason)
    }

    /// Terminal for the attempt. `JOB_SUCCESS`/`JOB_FAILURE` only count
    /// when the job has no post-script.
    pub fn is_terminal(&self, has_postscript: bool) -> bool {
        match self {
            JobState::PreScriptFailure
            | JobState::JobAborted
            | JobState::PostScriptSuccess
            | JobState::PostScriptFailure => true,
            JobState::JobSuccess | JobState::JobFailure => !has_postscript,
            other => other.is_submit_failure(),
        }
    }
}

/// Encode a regular exit code as a wait status (`-128` marks "unknown").
pub fn regular_to_raw(regular: i32) -> i32 {
    if regular == -128 { -1 } else { regular << 8 }
}

/// Decode a wait status: negative is unknown, low bits are a signal.
pub fn raw_to_regular(raw: i32) -> i32 {
    if raw < 0 {
        -128
    } else if raw & 127 != 0 {
        -(raw & 127)
    } else {
        raw >> 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_unknowns_pass_through() {
        assert_eq!(JobState::from_name("JOB_HELD"), JobState::JobHeld);
        assert_eq!(JobState::from_name("JOB_HELD").as_str(), "JOB_HELD");
        let odd = JobState::from_name("CLUSTER_SUBMIT");
        assert_eq!(odd, JobState::Other("CLUSTER_SUBMIT".into()));
        assert_eq!(odd.to_string(), "CLUSTER_SUBMIT");
    }

    #[test]
    fn exit_code_encoding() {
        assert_eq!(regular_to_raw(1), 256);
        assert_eq!(regular_to_raw(-128), -1);
        assert_eq!(raw_to_regular(256), 1);
        assert_eq!(raw_to_regular(9), -9);
        assert_eq!(raw_to_regular(-1), -128);
    }

    #[test]
    fn success_is_terminal_only_without_postscript() {
        assert!(JobState::JobSuccess.is_terminal(false));
        assert!(!JobState::JobSuccess.is_terminal(true));
        assert!(JobState::GlobusSubmitFailed.is_terminal(true));
        assert!(!JobState::Execute.is_terminal(false));
    }
}
