// crates/test-utils/src/log_line.rs

//! Engine progress log lines with deterministic timestamps.

use monitord::types::Timestamp;

/// Produces one newline-terminated log line per call, stamped
/// `2024-01-02 <10:00:00 + offset>+00:00`.
#[derive(Debug, Clone, Copy)]
pub struct LogLine {
    offset_secs: u32,
}

impl LogLine {
    /// A line `offset_secs` seconds after 10:00:00.
    pub fn at(offset_secs: u32) -> Self {
        Self { offset_secs }
    }

    /// Unix time of this line's stamp.
    pub fn timestamp(&self) -> Timestamp {
        // 2024-01-02T10:00:00Z
        1_704_189_600 + i64::from(self.offset_secs)
    }

    pub fn text(&self, body: &str) -> String {
        let secs = 10 * 3600 + self.offset_secs;
        format!(
            "2024-01-02 {:02}:{:02}:{:02}+00:00 {body}\n",
            (secs / 3600) % 24,
            (secs / 60) % 60,
            secs % 60
        )
    }

    pub fn version(&self, version: &str) -> String {
        self.text(&format!("** $CondorVersion: {version} Dec 10 2015 $"))
    }

    pub fn starting_up(&self, condor_id: &str) -> String {
        self.text(&format!("** condor_scheduniv_exec.{condor_id} (CONDOR_DAGMAN) STARTING UP"))
    }

    pub fn pid(&self, pid: i32) -> String {
        self.text(&format!("** PID = {pid}"))
    }

    pub fn parsing(&self, dag: &str) -> String {
        self.text(&format!("Parsing {dag} ..."))
    }

    pub fn exiting(&self, code: i32) -> String {
        self.text(&format!("** (condor_DAGMAN) pid 4242 EXITING WITH STATUS {code}"))
    }

    pub fn submitting(&self, job: &str) -> String {
        self.text(&format!("Submitting HTCondor Node {job} job(s)..."))
    }

    /// `Event: ULOG_<event> for HTCondor Node <job> (<sched>.0)`
    pub fn ulog(&self, event: &str, job: &str, sched: u32) -> String {
        self.text(&format!("Event: ULOG_{event} for HTCondor Node {job} ({sched}.0.0)"))
    }

    pub fn job_success(&self, job: &str, sched: u32) -> String {
        self.text(&format!("Node {job} job proc ({sched}.0.0) completed successfully."))
    }

    pub fn job_failure(&self, job: &str, sched: u32, status: i32) -> String {
        self.text(&format!("Node {job} job proc ({sched}.0.0) failed with status {status}."))
    }

    pub fn post_running(&self, job: &str) -> String {
        self.text(&format!("Running POST script of Node {job}..."))
    }

    pub fn post_success(&self, job: &str) -> String {
        self.text(&format!("POST Script of Node {job} completed successfully."))
    }

    pub fn post_failure(&self, job: &str, status: i32) -> String {
        self.text(&format!("POST Script of Node {job} failed with status {status}"))
    }

    pub fn hold_reason(&self, reason: &str) -> String {
        self.text(&format!("Hold reason: {reason}"))
    }
}
