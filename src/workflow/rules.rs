// src/workflow/rules.rs

//! User notification rules and their evaluation.
//!
//! The rules file lists what to run and when; this module only decides
//! which actions are due and with which environment. Running them is the
//! [`crate::notify::NotificationTrigger`]'s business.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::grammar::isodate;
use crate::job::{JobInstance, JobState, raw_to_regular};
use crate::types::Timestamp;

const ENV_PREFIX: &str = "WF_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Start,
    OnError,
    OnSuccess,
    AtEnd,
    All,
}

impl Condition {
    fn label(self) -> &'static str {
        match self {
            Condition::Start => "start",
            Condition::OnError => "on_error",
            Condition::OnSuccess => "on_success",
            Condition::AtEnd | Condition::All => "at_end",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Condition::Start),
            "on_error" => Ok(Condition::OnError),
            "on_success" => Ok(Condition::OnSuccess),
            "at_end" => Ok(Condition::AtEnd),
            "all" => Ok(Condition::All),
            other => Err(format!("unknown notification condition '{other}'")),
        }
    }
}

/// An action that is due, with the environment it runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub action: String,
    pub env: BTreeMap<String, String>,
}

type Actions = Vec<(Condition, String)>;

/// Facts about the workflow every notification carries.
#[derive(Debug, Clone, Copy)]
pub struct NotifyContext<'a> {
    pub ts: Timestamp,
    pub submit_dir: &'a str,
    /// `label-index`
    pub wf_id: &'a str,
}

impl NotifyContext<'_> {
    fn env(&self, event: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            env.insert(format!("{ENV_PREFIX}{k}"), v);
        };
        set("EVENT", event.to_string());
        set("EVENT_TIMESTAMP", self.ts.to_string());
        set("EVENT_TIMESTAMP_ISO", isodate(self.ts));
        set("SUBMIT_DIR", self.submit_dir.to_string());
        set("WFID", self.wf_id.to_string());
        env
    }
}

fn set_env(env: &mut BTreeMap<String, String>, key: &str, value: impl Into<String>) {
    env.insert(format!("{ENV_PREFIX}{key}"), value.into());
}

#[derive(Debug, Clone, Default)]
pub struct NotificationRules {
    workflow: Actions,
    jobs: HashMap<String, Actions>,
    invocations: HashMap<(String, i64), Actions>,
}

impl NotificationRules {
    /// Read a rules file. An unreadable file means no rules.
    pub fn load(fs: &dyn FileSystem, path: &Path, wf_uuid: &str) -> NotificationRules {
        info!(path = %path.display(), "loading notifications");
        match fs.read_to_string(path) {
            Ok(text) => Self::parse(&text, wf_uuid),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot load notification file, continuing without notifications");
                NotificationRules::default()
            }
        }
    }

    pub fn parse(text: &str, wf_uuid: &str) -> NotificationRules {
        let mut rules = NotificationRules::default();

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let kind = line.split_whitespace().next().unwrap_or_default().to_lowercase();

            if kind == "invocation" {
                let parts = splitn_whitespace(line, 5);
                let [_, job, task, cond, action] = parts.as_slice() else {
                    warn!(line, "cannot parse notification, skipping");
                    continue;
                };
                let Ok(task) = task.parse::<i64>() else {
                    warn!(line, "cannot parse notification, skipping");
                    continue;
                };
                let Some(cond) = parse_condition(cond, line) else { continue };
                rules
                    .invocations
                    .entry((job.to_string(), task))
                    .or_default()
                    .push((cond, action.to_string()));
                debug!(line, "loading notification");
                continue;
            }

            let parts = splitn_whitespace(line, 4);
            let [_, id, cond, action] = parts.as_slice() else {
                warn!(line, "cannot parse notification, skipping");
                continue;
            };
            let Some(cond) = parse_condition(cond, line) else { continue };
            match kind.as_str() {
                "workflow" => {
                    if *id != wf_uuid {
                        warn!(id, wf_uuid, "workflow notification has a different id, skipping");
                        continue;
                    }
                    rules.workflow.push((cond, action.to_string()));
                }
                "job" | "daxjob" | "dagjob" => {
                    rules.jobs.entry(id.to_string()).or_default().push((cond, action.to_string()));
                }
                _ => {
                    warn!(line, "unknown notification type, skipping");
                    continue;
                }
            }
            debug!(line, "loading notification");
        }

        debug!(count = rules.len(), wf_uuid, "loaded notifications");
        rules
    }

    pub fn len(&self) -> usize {
        self.workflow.len()
            + self.jobs.values().map(Vec::len).sum::<usize>()
            + self.invocations.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workflow start (`exit_code` is `None`) or end.
    pub fn for_workflow(
        &self,
        ctx: &NotifyContext<'_>,
        wf_uuid: &str,
        out_file: &str,
        exit_code: Option<i32>,
    ) -> Vec<Notification> {
        let mut due = Vec::new();
        for (cond, action) in &self.workflow {
            let event = match exit_code {
                None => match cond {
                    Condition::Start | Condition::All => Condition::Start,
                    _ => continue,
                },
                Some(code) => match cond {
                    Condition::OnError if code != 0 => *cond,
                    Condition::OnSuccess if code == 0 => *cond,
                    Condition::AtEnd | Condition::All => Condition::AtEnd,
                    _ => continue,
                },
            };
            let mut env = ctx.env(event.label());
            set_env(&mut env, "STDOUT", out_file);
            set_env(&mut env, "JOBID", wf_uuid);
            if let Some(code) = exit_code {
                set_env(&mut env, "STATUS", code.to_string());
            }
            due.push(Notification {
                action: action.clone(),
                env,
            });
        }
        due
    }

    /// Job-level rules for a state change of `job`.
    pub fn for_job(
        &self,
        ctx: &NotifyContext<'_>,
        job: &JobInstance,
        state: &JobState,
        has_postscript: bool,
        status: Option<i32>,
    ) -> Vec<Notification> {
        let Some(actions) = self.jobs.get(&job.job_id) else {
            return Vec::new();
        };

        let mut due = Vec::new();
        for (cond, action) in actions {
            let (event, status) = match state {
                JobState::Execute => match cond {
                    Condition::Start | Condition::All => (Condition::Start, None),
                    _ => continue,
                },
                JobState::JobSuccess | JobState::PostScriptSuccess => {
                    if !state.is_terminal(has_postscript) {
                        continue;
                    }
                    match cond {
                        Condition::Start | Condition::OnError => continue,
                        Condition::All => (Condition::AtEnd, Some(0)),
                        other => (*other, Some(0)),
                    }
                }
                JobState::JobFailure | JobState::PostScriptFailure => {
                    if !state.is_terminal(has_postscript) {
                        continue;
                    }
                    match cond {
                        Condition::Start | Condition::OnSuccess => continue,
                        Condition::All => (Condition::AtEnd, status),
                        other => (*other, status),
                    }
                }
                _ => continue,
            };

            let rotated = event != Condition::Start;
            let mut env = ctx.env(event.label());
            set_env(&mut env, "JOBID", job.job_id.as_str());
            set_env(&mut env, "STDOUT", job_file(ctx, job, job.submit.output_file.as_deref(), rotated));
            set_env(&mut env, "STDERR", job_file(ctx, job, job.submit.error_file.as_deref(), rotated));
            if let Some(status) = status {
                set_env(&mut env, "STATUS", status.to_string());
            }
            due.push(Notification {
                action: action.clone(),
                env,
            });
        }
        due
    }

    /// Invocation-level rules once task `task_id` of `job` has finished.
    /// `raw_status` is the task's wait status.
    pub fn for_invocation(
        &self,
        ctx: &NotifyContext<'_>,
        job: &JobInstance,
        task_id: i64,
        raw_status: Option<i32>,
    ) -> Vec<Notification> {
        let Some(actions) = self.invocations.get(&(job.job_id.clone(), task_id)) else {
            return Vec::new();
        };

        let mut due = Vec::new();
        for (cond, action) in actions {
            let succeeded = raw_status == Some(0);
            let event = match cond {
                Condition::OnError if succeeded => continue,
                Condition::OnSuccess if !succeeded => continue,
                Condition::All => Condition::AtEnd,
                other => *other,
            };

            let mut env = ctx.env(event.label());
            set_env(&mut env, "JOBID", job.job_id.as_str());
            set_env(&mut env, "INVID", task_id.to_string());
            set_env(&mut env, "STDOUT", job_file(ctx, job, job.submit.output_file.as_deref(), true));
            set_env(&mut env, "STDERR", job_file(ctx, job, job.submit.error_file.as_deref(), true));
            if event != Condition::Start {
                let status = raw_status.map_or(-128, raw_to_regular);
                set_env(&mut env, "STATUS", status.to_string());
            }
            due.push(Notification {
                action: action.clone(),
                env,
            });
        }
        due
    }
}

fn parse_condition(raw: &str, line: &str) -> Option<Condition> {
    match raw.parse() {
        Ok(cond) => Some(cond),
        Err(err) => {
            warn!(line, error = %err, "cannot parse notification, skipping");
            None
        }
    }
}

fn job_file(ctx: &NotifyContext<'_>, job: &JobInstance, name: Option<&str>, rotated: bool) -> String {
    let base = Path::new(ctx.submit_dir).join(name.unwrap_or_default());
    let base = base.display().to_string();
    if rotated {
        format!("{base}.{:03}", job.output_counter)
    } else {
        base
    }
}

/// Split on whitespace into at most `n` pieces; the last keeps its inner
/// spacing.
fn splitn_whitespace(line: &str, n: usize) -> Vec<&str> {
    let mut parts = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    while parts.len() + 1 < n {
        let Some(end) = rest.find(char::is_whitespace) else { break };
        parts.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if !rest.is_empty() {
        parts.push(rest.trim_end());
    }
    parts
}
