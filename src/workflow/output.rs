// src/workflow/output.rs

//! What a finished job left behind: structured output records, the plain
//! `.out`/`.err` files and the task list of clustered jobs.
//!
//! Collection mutates the attempt; the events are built afterwards from
//! the settled attempt so every task sees the same job facts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::events::{self, HostRecord};
use super::{JobKey, Workflow};
use crate::fs::FileSystem;
use crate::job::kickstart::{integrity_from_outputs, parse_records};
use crate::job::{Invocation, JobInstance, KickstartRecord, raw_to_regular, regular_to_raw};

static LITE_EXITCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^PegasusLite: exitcode (\d+)$").expect("valid exitcode pattern"));

type TaskProps = BTreeMap<String, String>;

pub(super) struct OutputContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub run_dir: &'a Path,
    pub is_subdag: bool,
    /// Output files carry the attempt suffix.
    pub rotated: bool,
    pub max_output_length: usize,
    pub skip_stdout: bool,
}

#[derive(Debug, Default)]
pub(super) struct TaskOutput {
    pub inv: Option<Invocation>,
    pub host: Option<HostRecord>,
}

#[derive(Debug, Default)]
pub(super) struct ParsedOutput {
    pub tasks: Vec<TaskOutput>,
    /// Exit code of the application when the output held a single record.
    pub app_exitcode: Option<i32>,
}

impl Workflow {
    /// Parse the output of attempt `key` and queue its task, host and
    /// integrity events. Returns the application exit code if known.
    pub(super) fn parse_job_output(&mut self, key: &JobKey) -> Option<i32> {
        let ctx = OutputContext {
            fs: self.fs.as_ref(),
            run_dir: &self.run_dir,
            is_subdag: self.dag.is_subdag(&key.0),
            rotated: self.dag.has_postscript(&key.0) || self.dag.is_pmc,
            max_output_length: self.max_output_length,
            skip_stdout: self.options.skip_stdout,
        };
        let job = self.jobs.get_mut(key)?;
        let parsed = collect_output(job, &ctx);
        let is_subdag = ctx.is_subdag;

        let Some(job) = self.jobs.get(key) else {
            return parsed.app_exitcode;
        };
        let host_ts = job.state_ts.unwrap_or(self.current_ts);
        let mut out = Vec::new();
        let mut due = Vec::new();
        let rules = self.notifications_due();
        let notify_ctx = self.notify_context();

        for (idx, task) in parsed.tasks.iter().enumerate() {
            let task_id = idx as i64 + 1;
            let inv = task.inv.as_ref();
            if let Some(rules) = rules {
                let raw = inv.and_then(|i| i.raw).or(job.main_exitcode);
                due.extend(rules.for_invocation(&notify_ctx, job, task_id, raw));
            }
            out.push(("inv.start", events::task_inv_start(job, task_id, inv)));
            out.push(("inv.end", events::task_inv_end(job, task_id, inv, is_subdag)));
            for fields in events::task_monitoring(job, task_id, self.current_ts) {
                out.push(("task.monitoring", fields));
            }
            if let Some(inv) = inv {
                for fields in events::files_metadata(job, inv, self.current_ts) {
                    out.push(("rc.meta", fields));
                }
            }
            if let Some(host) = &task.host {
                out.push(("job_inst.host.info", events::host_info(job, host, host_ts)));
            }
        }
        out.extend(events::integrity(job, self.current_ts));

        for (kind, fields) in out {
            self.emit(kind, fields);
        }
        self.push_notifications(due);
        parsed.app_exitcode
    }
}

pub(super) fn collect_output(job: &mut JobInstance, ctx: &OutputContext<'_>) -> ParsedOutput {
    let mut records = Vec::new();
    if !ctx.is_subdag {
        if ctx.rotated {
            job.has_rotated_files = true;
        }
        let path = job.out_path();
        match ctx.fs.read_to_string(&path) {
            Ok(text) => records = parse_records(&text),
            Err(err) => {
                if !job.is_noop() {
                    error!(job = %job.job_id, path = %path.display(), error = %err, "unable to read output file");
                }
            }
        }
    }

    if let Some(code) = pegasus_lite_exitcode(job, ctx) {
        debug!(job = %job.job_id, code, "wrapper reported exit code");
        job.main_exitcode = Some(regular_to_raw(code));
    }
    job.read_error_file(ctx.fs, ctx.max_output_length);

    let mut parsed = ParsedOutput::default();

    if records.is_empty() {
        parsed.tasks.push(synthetic_task(job, ctx));
        if !ctx.skip_stdout {
            job.read_output_file(ctx.fs, None, ctx.max_output_length);
        }
        return parsed;
    }

    let single = records.len() == 1;
    if job.absorb_records(&mut records, ctx.max_output_length) {
        for record in records {
            let KickstartRecord::Invocation(inv) = record else {
                continue;
            };
            if single {
                parsed.app_exitcode = inv.exitcode;
            }
            job.add_integrity_metric(integrity_from_outputs(&inv));
            let host = Some(HostRecord::from_invocation(&inv));
            parsed.tasks.push(TaskOutput { inv: Some(*inv), host });
        }
        return parsed;
    }

    parsed.tasks = cluster_tasks(job, records, ctx.fs);
    if parsed.tasks.is_empty() {
        parsed.tasks.push(synthetic_task(job, ctx));
    }
    parsed
}

/// Stand-in task for a job whose output describes none, so every attempt
/// still reports one invocation.
fn synthetic_task(job: &JobInstance, ctx: &OutputContext<'_>) -> TaskOutput {
    let host = (ctx.is_subdag || job.job_id.starts_with("subdax_")).then(|| local_host(job));
    TaskOutput { inv: None, host }
}

/// Tasks of a clustered job run without wrapper records: one task line
/// per task, completed from the job's `.in` file.
fn cluster_tasks(job: &JobInstance, records: Vec<KickstartRecord>, fs: &dyn FileSystem) -> Vec<TaskOutput> {
    let mut tasks: BTreeMap<i64, TaskProps> = BTreeMap::new();
    for record in records {
        let KickstartRecord::ClusterTask(props) = record else {
            continue;
        };
        match props.get("id").map(|id| id.parse::<i64>()) {
            Some(Ok(id)) => {
                tasks.insert(id, props);
            }
            Some(Err(_)) => warn!(job = %job.job_id, id = ?props.get("id"), "task id looks invalid, skipping"),
            None => warn!(job = %job.job_id, "id missing from task record, skipping"),
        }
    }
    if tasks.is_empty() {
        info!(job = %job.job_id, "no tasks found for job");
        return Vec::new();
    }

    let in_path = job.submit_dir.join(format!("{}.in", job.job_id));
    if !read_task_file(fs, &in_path, &mut tasks) {
        return Vec::new();
    }
    let mut out = Vec::new();
    for (id, props) in &tasks {
        match task_invocation(props) {
            Some(inv) => out.push(TaskOutput { inv: Some(inv), host: None }),
            None => info!(job = %job.job_id, task = id, "task has incomplete information, skipping it"),
        }
    }
    out
}

fn pegasus_lite_exitcode(job: &JobInstance, ctx: &OutputContext<'_>) -> Option<i32> {
    let path = ctx.run_dir.join(job.rotated_err_name()?);
    if !ctx.fs.is_file(&path) {
        return None;
    }
    let text = ctx.fs.read_to_string(&path).ok()?;
    LITE_EXITCODE.captures(&text)?.get(1)?.as_str().parse().ok()
}

fn local_host(job: &JobInstance) -> HostRecord {
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok());
    HostRecord {
        hostname,
        site: job.site.clone(),
        ..HostRecord::default()
    }
}

/// Fill task names, arguments and transformations from the job's `.in`
/// file. Returns false when the file cannot be read.
fn read_task_file(fs: &dyn FileSystem, path: &Path, tasks: &mut BTreeMap<i64, TaskProps>) -> bool {
    let text = match fs.read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unable to read task file");
            return false;
        }
    };

    let mut found: i64 = 0;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("#@") {
            let Some((id, rest)) = rest.trim().split_once(char::is_whitespace) else {
                continue;
            };
            let Some((transformation, derivation)) = rest.trim_start().split_once(char::is_whitespace) else {
                continue;
            };
            let Ok(id) = id.parse::<i64>() else {
                continue;
            };
            let Some(task) = tasks.get_mut(&id) else {
                warn!(path = %path.display(), task = id, "cannot locate task, skipping");
                continue;
            };
            task.insert("transformation".into(), transformation.to_string());
            task.insert("derivation".into(), derivation.trim().to_string());
        } else if line.starts_with('#') || line.starts_with("EDGE") {
            continue;
        } else {
            found += 1;
            let (name, argv) = match line.split_once(char::is_whitespace) {
                Some((name, argv)) => (name, Some(argv.trim())),
                None => (line, None),
            };
            let Some(task) = tasks.get_mut(&found) else {
                warn!(path = %path.display(), task = found, "cannot locate task, skipping");
                continue;
            };
            task.insert("name".into(), name.to_string());
            if let Some(argv) = argv {
                task.insert("argument-vector".into(), argv.to_string());
            }
        }
    }
    true
}

fn task_invocation(props: &TaskProps) -> Option<Invocation> {
    let raw = props.get("status").and_then(|s| s.parse::<i32>().ok());
    Some(Invocation {
        transformation: Some(props.get("transformation")?.clone()),
        derivation: Some(props.get("derivation")?.clone()),
        start: Some(props.get("start")?.clone()),
        duration: Some(props.get("duration")?.parse().ok()?),
        executable: Some(props.get("name")?.clone()),
        argv: props.get("argument-vector").cloned(),
        raw,
        exitcode: raw.map(raw_to_regular),
        ..Invocation::default()
    })
}
