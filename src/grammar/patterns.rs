// src/grammar/patterns.rs

//! Ordered pattern table for engine log lines.
//!
//! Each rule pairs one fixed regex with a handler. Rules are tried in table
//! order and the first match decides the line.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::job::state::JobState;

/// Which job a classified line refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Named(String),
    /// The line only makes sense for the most recently submitted job.
    LastSubmitted,
    /// The line only makes sense for the most recently touched job.
    LastKnown,
}

/// One job-level event extracted from a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLine {
    pub state: JobState,
    pub target: JobTarget,
    pub sched_id: Option<String>,
    pub status: Option<i32>,
    pub reason: Option<String>,
}

impl JobLine {
    pub fn named(state: JobState, job: &str) -> Self {
        Self {
            state,
            target: JobTarget::Named(job.to_string()),
            sched_id: None,
            status: None,
            reason: None,
        }
    }

    fn with_sched_id(mut self, sched_id: &str) -> Self {
        self.sched_id = Some(sched_id.to_string());
        self
    }

    fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }
}

/// Workflow-engine level facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    /// The engine process started up with this scheduler id.
    StartingUp { condor_id: String },
    /// The engine is about to exit with this status.
    Exiting { exit_code: i32 },
    Pid(i32),
    /// The engine began reading its DAG; the workflow is running.
    ParsingDag { dag: String },
    Version { version: String, numeric: u32 },
    CommonLog(String),
    /// The engine was told to abort.
    AbortSignal,
}

/// Outcome of the table lookup, before the timestamp is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Jobs(Vec<JobLine>),
    Engine(EngineLine),
}

type Handler = fn(&Captures<'_>, &str) -> Option<Parsed>;

pub struct Rule {
    pub name: &'static str,
    pattern: Regex,
    handler: Handler,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, handler: Handler) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("valid log line pattern"),
            handler,
        }
    }

    /// Apply this rule alone; `None` if the pattern does not match.
    pub fn apply(&self, line: &str) -> Option<Option<Parsed>> {
        self.pattern
            .captures(line)
            .map(|caps| (self.handler)(&caps, line))
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish_non_exhaustive()
    }
}

static SCRIPT_OK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"completed successfully\.$").expect("valid pattern"));
static SCRIPT_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"failed with status\s+(-?\d+)\.?$").expect("valid pattern"));

/// The rule table, in priority order.
pub static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(
            "event",
            r"Event:\s+ULOG_(\S+) for (?:HT|)Condor (?:Job|Node) (\S+)\s+\((-?[0-9]+\.[0-9]+)(\.[0-9]+)?\)",
            on_event,
        ),
        Rule::new("submit", r"Submitting (?:HT|)Condor Node (.+) job", on_submit),
        Rule::new("submit_error", r"ERROR: submit attempt failed", on_submit_error),
        Rule::new(
            "script_running",
            r"\d{2}\s(?:\(D_\w*\)\s)?Running (PRE|POST) script of (?:Job|Node) (.+)\.{3}",
            on_script_running,
        ),
        Rule::new(
            "script_done",
            r"\d{2}\s(?:\(D_\w*\)\s)?(PRE|POST) Script of (?:Job|[nN]ode) (\S+)",
            on_script_done,
        ),
        Rule::new(
            "job_failed",
            r"\d{2}\s(?:\(D_\w*\)\s)?Node (\S+) job proc \(([0-9\.]+)\) failed with (status|signal)\s+(-?\d+)\.$",
            on_job_failed,
        ),
        Rule::new(
            "job_successful",
            r"\d{2}\s(?:\(D_\w*\)\s)?Node (\S+) job proc \(([0-9\.]+)\) completed successfully\.$",
            on_job_successful,
        ),
        Rule::new(
            "engine_finished",
            r"\(condor_DAGMAN\)[\w\s]+EXITING WITH STATUS (\d+)$",
            on_engine_finished,
        ),
        Rule::new(
            "engine_starting",
            r"\*\* condor_scheduniv_exec\.([0-9\.]+) \(CONDOR_DAGMAN\) STARTING UP",
            on_engine_starting,
        ),
        Rule::new("engine_pid", r"\*\* PID = (\d+)$", on_engine_pid),
        Rule::new("dag_parsing", r"Parsing (.+) \.\.\.$", on_dag_parsing),
        Rule::new(
            "engine_version",
            r"\*\* \$CondorVersion: ((\d+)\.(\d+)\.(\d+))",
            on_engine_version,
        ),
        Rule::new("common_log", r"Condor log will be written to ([^,]+)", on_common_log),
        Rule::new("abort_signal", r"Received SIGUSR1", |_, _| {
            Some(Parsed::Engine(EngineLine::AbortSignal))
        }),
        Rule::new("hold_reason", r"\s*Hold reason:(.*)", on_hold_reason),
    ]
});

fn int(caps: &Captures<'_>, idx: usize) -> Option<i32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

fn text<'a>(caps: &'a Captures<'_>, idx: usize) -> Option<&'a str> {
    caps.get(idx).map(|m| m.as_str())
}

fn on_event(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    let state = JobState::from_name(text(caps, 1)?);
    let job = JobLine::named(state, text(caps, 2)?).with_sched_id(text(caps, 3)?);
    Some(Parsed::Jobs(vec![job]))
}

fn on_submit(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Jobs(vec![JobLine::named(
        JobState::DagmanSubmit,
        text(caps, 1)?,
    )]))
}

fn on_submit_error(_caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Jobs(vec![JobLine {
        state: JobState::SubmitFailed,
        target: JobTarget::LastSubmitted,
        sched_id: None,
        status: None,
        reason: None,
    }]))
}

fn on_script_running(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    let state = match text(caps, 1)? {
        "PRE" => JobState::PreScriptStarted,
        _ => JobState::PostScriptStarted,
    };
    Some(Parsed::Jobs(vec![JobLine::named(state, text(caps, 2)?)]))
}

fn on_script_done(caps: &Captures<'_>, line: &str) -> Option<Parsed> {
    let pre = text(caps, 1)? == "PRE";
    let job = text(caps, 2)?;
    let mut events = Vec::new();

    // The engine never logs a separate pre-script termination event.
    if pre {
        events.push(JobLine::named(JobState::PreScriptTerminated, job));
    }

    let (ok, failed) = if pre {
        (JobState::PreScriptSuccess, JobState::PreScriptFailure)
    } else {
        (JobState::PostScriptSuccess, JobState::PostScriptFailure)
    };

    if SCRIPT_OK.is_match(line) {
        events.push(JobLine::named(ok, job).with_status(0));
    } else if let Some(status) = SCRIPT_FAILED.captures(line).and_then(|c| int(&c, 1)) {
        events.push(JobLine::named(failed, job).with_status(status));
    } else {
        warn!(job = %job, line = %line, "unknown pscript state");
    }

    if events.is_empty() {
        None
    } else {
        Some(Parsed::Jobs(events))
    }
}

fn on_job_failed(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    let job = JobLine::named(JobState::JobFailure, text(caps, 1)?)
        .with_sched_id(text(caps, 2)?)
        .with_status(int(caps, 4)?);
    Some(Parsed::Jobs(vec![job]))
}

fn on_job_successful(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    let job = JobLine::named(JobState::JobSuccess, text(caps, 1)?)
        .with_sched_id(text(caps, 2)?)
        .with_status(0);
    Some(Parsed::Jobs(vec![job]))
}

fn on_engine_finished(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Engine(EngineLine::Exiting {
        exit_code: int(caps, 1)?,
    }))
}

fn on_engine_starting(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Engine(EngineLine::StartingUp {
        condor_id: text(caps, 1)?.to_string(),
    }))
}

fn on_engine_pid(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Engine(EngineLine::Pid(int(caps, 1)?)))
}

fn on_dag_parsing(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Engine(EngineLine::ParsingDag {
        dag: text(caps, 1)?.to_string(),
    }))
}

fn on_engine_version(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    let part = |idx| caps.get(idx).and_then(|m| m.as_str().parse::<u32>().ok());
    let numeric = part(2)? * 10000 + part(3)? * 100 + part(4)?;
    Some(Parsed::Engine(EngineLine::Version {
        version: text(caps, 1)?.to_string(),
        numeric,
    }))
}

fn on_common_log(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Engine(EngineLine::CommonLog(
        text(caps, 1)?.trim().to_string(),
    )))
}

fn on_hold_reason(caps: &Captures<'_>, _line: &str) -> Option<Parsed> {
    Some(Parsed::Jobs(vec![JobLine {
        state: JobState::JobHeldReason,
        target: JobTarget::LastKnown,
        sched_id: None,
        status: None,
        reason: Some(text(caps, 1)?.trim().to_string()),
    }]))
}

/// Run the table; the first matching rule decides.
pub fn match_rules(line: &str) -> Option<(&'static str, Option<Parsed>)> {
    RULES
        .iter()
        .find_map(|rule| rule.apply(line).map(|parsed| (rule.name, parsed)))
}
