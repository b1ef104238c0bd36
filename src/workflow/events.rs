// src/workflow/events.rs

//! Construction of every structured event a workflow emits.
//!
//! Builders here only shape fields; deciding *when* an event is due is the
//! tracker's job. All kinds live under the `stampede.` namespace and every
//! event carries an `event__key` digest so consumers can drop redeliveries.

use serde_json::Value;

use crate::grammar::parse_iso;
use crate::job::{Invocation, JobInstance, MonitoringRecord};
use crate::sink::{Fields, StructuredEvent};
use crate::types::Timestamp;
use crate::workflow::dag_file::JobInfo;
use crate::workflow::manifest::Manifest;

pub const EVENT_NAMESPACE: &str = "stampede.";

pub const PRESCRIPT_TASK_ID: i64 = -1;
pub const POSTSCRIPT_TASK_ID: i64 = -2;

const SUBDAG_TRANSFORMATION: &str = "condor::dagman";
const SUBDAG_EXECUTABLE: &str = "condor_dagman";

/// Which DAG script an invocation event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Pre,
    Post,
}

/// Blake3 digest of `xwf__id|job__id|job_inst__id|event`.
pub fn event_key(kind: &str, fields: &Fields) -> String {
    let part = |key: &str| fields.get(key).map(value_text).unwrap_or_default();
    let material = format!(
        "{}|{}|{}|{}",
        part("xwf__id"),
        part("job__id"),
        part("job_inst__id"),
        kind
    );
    blake3::hash(material.as_bytes()).to_hex().to_string()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn put(fields: &mut Fields, key: &str, value: impl Into<Value>) {
    fields.insert(key.to_string(), value.into());
}

fn put_opt<V: Into<Value>>(fields: &mut Fields, key: &str, value: Option<V>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value.into());
    }
}

fn mark_error(fields: &mut Fields) {
    put(fields, "level", "Error");
}

/// Attributes attached to every event of one workflow.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    addon: Fields,
}

impl EventBuilder {
    pub fn new(manifest: &Manifest, root_wf_uuid: &str, wf_timestamp: Timestamp) -> Self {
        let mut addon = Fields::new();
        put(&mut addon, "xwf__id", manifest.wf_uuid.as_str());
        put(&mut addon, "root__xwf__id", root_wf_uuid);
        put_opt(&mut addon, "dax", manifest.dax.as_deref());
        put(&mut addon, "dag", manifest.dag.as_str());
        put(&mut addon, "wf__ts", wf_timestamp);
        put_opt(&mut addon, "submit__dir", manifest.submit_dir.as_deref());
        put_opt(&mut addon, "pegasus__version", manifest.planner_version.as_deref());
        put_opt(&mut addon, "submit__hostname", manifest.submit_hostname.as_deref());
        put_opt(&mut addon, "wf__user", manifest.user.as_deref());
        Self { addon }
    }

    /// Finished event carrying the workflow attributes.
    pub fn build(&self, kind: &str, mut fields: Fields) -> StructuredEvent {
        fields.extend(self.addon.clone());
        finish(kind, fields)
    }

    /// Finished event without workflow attributes, for events whose
    /// `xwf__id` names another workflow.
    pub fn build_bare(&self, kind: &str, fields: Fields) -> StructuredEvent {
        finish(kind, fields)
    }
}

fn finish(kind: &str, mut fields: Fields) -> StructuredEvent {
    let key = event_key(kind, &fields);
    put(&mut fields, "event__key", key);
    StructuredEvent::new(format!("{EVENT_NAMESPACE}{kind}"), fields)
}

fn job_ids(job: &JobInstance) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", job.wf_uuid.as_str());
    put(&mut fields, "job__id", job.job_id.as_str());
    put(&mut fields, "job_inst__id", job.submit_seq);
    fields
}

/// `wf.plan`: everything known about the workflow at planning time.
pub fn wf_plan(manifest: &Manifest, ts: Timestamp, parent: Option<&str>, root: &str) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", manifest.wf_uuid.as_str());
    put_opt(&mut fields, "dax__label", manifest.label.as_deref());
    put_opt(&mut fields, "dax__version", manifest.dax_version.as_deref());
    put_opt(&mut fields, "dax__index", manifest.index.as_deref());
    put_opt(&mut fields, "dax__file", manifest.dax.as_deref());
    put(&mut fields, "dag__file__name", manifest.dag.as_str());
    put(&mut fields, "ts", ts);
    put_opt(&mut fields, "submit__hostname", manifest.submit_hostname.as_deref());
    put_opt(&mut fields, "submit__dir", manifest.submit_dir.as_deref());
    if let Some(args) = &manifest.planner_arguments {
        put(&mut fields, "argv", args.trim_matches(|c| matches!(c, '"' | ' ' | '\t' | '\n' | '\r')));
    }
    put_opt(&mut fields, "user", manifest.user.as_deref());
    if let Some(dn) = manifest.grid_dn.as_deref().filter(|dn| *dn != "null") {
        put(&mut fields, "grid_dn", dn);
    }
    put_opt(&mut fields, "planner__version", manifest.planner_version.as_deref());
    put_opt(&mut fields, "parent__xwf__id", parent);
    put(&mut fields, "root__xwf__id", root);
    fields
}

/// `job.info` for one job named in the DAG file.
pub fn job_info(wf_uuid: &str, job_id: &str, info: &JobInfo, clustered: bool, ts: Timestamp) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", wf_uuid);
    put(&mut fields, "job__id", job_id);
    put(&mut fields, "ts", ts);
    put(
        &mut fields,
        "submit_file",
        info.sub_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    );
    put(&mut fields, "type_desc", if info.is_subdag { "dag" } else { "job" });
    put(&mut fields, "clustered", clustered);
    put(&mut fields, "has_prescript", info.pre_exec.is_some());
    put(&mut fields, "has_postscript", info.has_postscript());
    fields
}

/// `job.edge` for one dependency.
pub fn job_edge(wf_uuid: &str, parent: &str, child: &str, ts: Timestamp) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", wf_uuid);
    put(&mut fields, "parent__job__id", parent);
    put(&mut fields, "child__job__id", child);
    put(&mut fields, "ts", ts);
    fields
}

/// `xwf.map.subwf_job`: the child workflow as seen from its parent job.
pub fn subwf_map(parent_uuid: &str, ts: Timestamp, child_uuid: &str, job_id: &str, job_seq: u32) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", parent_uuid);
    put(&mut fields, "ts", ts);
    put(&mut fields, "subwf__id", child_uuid);
    put(&mut fields, "job__id", job_id);
    put(&mut fields, "job_inst__id", job_seq);
    fields
}

/// `xwf.start` (no status) or `xwf.end` (with status).
pub fn wf_state(
    wf_uuid: &str,
    ts: Timestamp,
    reason: Option<&str>,
    restart_count: i64,
    end_status: Option<i32>,
) -> Fields {
    let mut fields = Fields::new();
    put(&mut fields, "xwf__id", wf_uuid);
    put(&mut fields, "ts", ts);
    put(&mut fields, "reason", reason);
    put(&mut fields, "restart_count", restart_count - 1);
    if let Some(status) = end_status {
        put(&mut fields, "status", status);
        if status != 0 {
            mark_error(&mut fields);
        }
    }
    fields
}

/// Short job state events (`submit.start`, `held.end`, ...).
pub fn job_brief(job: &JobInstance, event: &str, status: Option<i32>, reason: Option<&str>) -> Fields {
    let mut fields = job_ids(job);
    put_opt(&mut fields, "ts", job.state_ts);
    put(&mut fields, "js__id", job.state_seq);
    put(&mut fields, "reason", reason);
    put_opt(&mut fields, "sched__id", job.sched_id.as_deref());
    if let Some(status) = status {
        put(&mut fields, "status", status);
        if status != 0 {
            mark_error(&mut fields);
        }
    }
    match event {
        "post.end" => put(&mut fields, "exitcode", code_text(job.post_exitcode)),
        "pre.end" => put(&mut fields, "exitcode", code_text(job.pre_exitcode)),
        "submit.start" => put_opt(&mut fields, "site", job.site.as_deref()),
        _ => {}
    }
    fields
}

fn code_text(code: Option<i32>) -> String {
    code.map_or_else(|| "None".to_string(), |c| c.to_string())
}

pub fn main_start(job: &JobInstance) -> Fields {
    let mut fields = job_ids(job);
    put_opt(&mut fields, "ts", job.state_ts);
    put(&mut fields, "js__id", job.state_seq);
    put_opt(&mut fields, "stdin__file", job.submit.input_file.as_deref());
    put_opt(&mut fields, "stdout__file", job.submit.output_file.as_deref());
    put_opt(&mut fields, "stderr__file", job.submit.error_file.as_deref());
    put_opt(&mut fields, "sched__id", job.sched_id.as_deref());
    fields
}

/// The part of `main.end` known as soon as the job finishes.
pub fn main_end(job: &JobInstance, status: Option<i32>, wf_user: Option<&str>) -> Fields {
    let mut fields = job_ids(job);
    put_opt(&mut fields, "ts", job.state_ts);
    put(&mut fields, "js__id", job.state_seq);
    put(&mut fields, "site", job.site.clone().unwrap_or_default());
    put_opt(&mut fields, "user", job.remote_user.as_deref().or(wf_user));
    if let (Some(start), Some(done)) = (job.main_start, job.main_done) {
        put(&mut fields, "local__dur", done - start);
    }
    put_opt(&mut fields, "stdin_file", job.submit.input_file.as_deref());
    put_opt(&mut fields, "multiplier_factor", job.submit.multiplier.map(|m| m.to_string()));
    put(&mut fields, "exitcode", code_text(job.main_exitcode));
    put_opt(&mut fields, "sched__id", job.sched_id.as_deref());
    match status {
        Some(status) => {
            put(&mut fields, "status", status);
            if status != 0 {
                mark_error(&mut fields);
            }
        }
        None => {
            put(&mut fields, "status", -1);
            mark_error(&mut fields);
        }
    }
    fields
}

/// Options that shape the output-dependent part of `main.end`.
#[derive(Debug, Clone, Copy)]
pub struct OutputPolicy<'a> {
    pub original_submit_dir: Option<&'a str>,
    pub include_text: bool,
    pub max_output_length: usize,
}

/// Complete `main.end` with what output parsing learned.
pub fn complete_main_end(job: &JobInstance, mut fields: Fields, policy: OutputPolicy<'_>) -> Fields {
    put_opt(
        &mut fields,
        "work_dir",
        job.remote_cwd.as_deref().or(policy.original_submit_dir),
    );
    put_opt(&mut fields, "cluster__start", job.cluster_start);
    put_opt(&mut fields, "cluster__dur", job.cluster_duration);

    let rotated = job.kickstart_parsed || job.has_rotated_files;
    let file_name = |base: Option<&String>| match base {
        Some(base) if rotated => format!("{base}.{:03}", job.output_counter),
        Some(base) => base.clone(),
        None => String::new(),
    };
    put(&mut fields, "stdout__file", file_name(job.submit.output_file.as_ref()));
    put(&mut fields, "stderr__file", file_name(job.submit.error_file.as_ref()));

    if policy.include_text {
        for (key, text) in [("stdout__text", &job.stdout_text), ("stderr__text", &job.stderr_text)] {
            let Some(text) = text else { continue };
            if text.len() > policy.max_output_length {
                tracing::warn!(job = %job.job_id, field = key, "truncating job output");
                put(&mut fields, key, truncate(text, policy.max_output_length));
            } else {
                put(&mut fields, key, text.as_str());
            }
        }
    }
    fields
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// `inv.start` of a PRE or POST script.
pub fn script_inv_start(job: &JobInstance, script: Script) -> Fields {
    let mut fields = job_ids(job);
    let (id, start) = match script {
        Script::Pre => (PRESCRIPT_TASK_ID, job.pre_start),
        Script::Post => (POSTSCRIPT_TASK_ID, job.post_start),
    };
    put(&mut fields, "inv__id", id);
    put(&mut fields, "ts", start);
    fields
}

/// `inv.end` of a PRE or POST script.
pub fn script_inv_end(job: &JobInstance, script: Script, info: Option<&JobInfo>) -> Fields {
    let mut fields = job_ids(job);
    let (id, transformation, start, done, code, exec, args) = match script {
        Script::Pre => (
            PRESCRIPT_TASK_ID,
            "dagman::pre",
            job.pre_start,
            job.pre_done,
            job.pre_exitcode,
            info.and_then(|i| i.pre_exec.as_deref()),
            info.and_then(|i| i.pre_args.as_deref()),
        ),
        Script::Post => (
            POSTSCRIPT_TASK_ID,
            "dagman::post",
            job.post_start,
            job.post_done,
            job.post_exitcode,
            info.and_then(|i| i.post_exec.as_deref()),
            info.and_then(|i| i.post_args.as_deref()),
        ),
    };
    put(&mut fields, "inv__id", id);
    put(&mut fields, "transformation", transformation);
    put(&mut fields, "start_time", start.or(done));
    match (start, done) {
        (Some(start), Some(done)) => {
            put(&mut fields, "dur", done - start);
            put(&mut fields, "remote_cpu_time", done - start);
        }
        _ => put(&mut fields, "dur", 0),
    }
    let exitcode = code_text(code);
    if exitcode != "0" {
        mark_error(&mut fields);
    }
    put(&mut fields, "exitcode", exitcode);
    put(&mut fields, "executable", exec.unwrap_or_default());
    put_opt(&mut fields, "argv", args);
    put(&mut fields, "ts", done);
    fields
}

fn record_start(job: &JobInstance, inv: Option<&Invocation>) -> Option<Timestamp> {
    inv.and_then(|i| i.start.as_deref())
        .and_then(parse_iso)
        .or(job.main_start)
        .or(job.main_done)
}

/// `inv.start` of one task of the main job.
pub fn task_inv_start(job: &JobInstance, task_id: i64, inv: Option<&Invocation>) -> Fields {
    let mut fields = job_ids(job);
    put(&mut fields, "inv__id", task_id);
    put_opt(&mut fields, "ts", record_start(job, inv));
    fields
}

/// `inv.end` of one task of the main job.
pub fn task_inv_end(job: &JobInstance, task_id: i64, inv: Option<&Invocation>, is_subdag: bool) -> Fields {
    let mut fields = job_ids(job);
    put(&mut fields, "inv__id", task_id);

    let transformation = inv
        .and_then(|i| i.transformation.clone())
        .or_else(|| job.submit.transformation.clone())
        .or_else(|| is_subdag.then(|| SUBDAG_TRANSFORMATION.to_string()));
    put_opt(&mut fields, "transformation", transformation);

    let derivation = match inv.and_then(|i| i.derivation.as_deref()) {
        Some("null") => None,
        Some(d) => Some(d.to_string()),
        None => job.submit.derivation.clone(),
    };
    put_opt(&mut fields, "task__id", derivation);

    let start = record_start(job, inv);
    put_opt(&mut fields, "start_time", start);

    let duration = match inv.and_then(|i| i.duration) {
        Some(d) => Some(d),
        None => match (job.main_start, job.main_done) {
            (Some(s), Some(d)) => Some((d - s) as f64),
            (None, Some(_)) => Some(0.0),
            _ => None,
        },
    };
    put_opt(&mut fields, "dur", duration);

    if let Some((utime, stime)) = inv.and_then(|i| i.utime.zip(i.stime)) {
        let cpu = utime + stime;
        put(&mut fields, "remote_cpu_time", cpu);
        if let Some(dur) = duration.filter(|d| *d > 0.0) {
            put(&mut fields, "avg_cpu", cpu / dur);
        }
    }
    put_opt(&mut fields, "maxrss", inv.and_then(|i| i.maxrss));

    let ts = match (start, inv.and_then(|i| i.duration)) {
        (Some(start), Some(d)) => Some(start + d as i64),
        _ => job.main_done,
    };
    put(&mut fields, "ts", ts);

    let exitcode = inv
        .and_then(|i| i.raw)
        .or(job.main_exitcode)
        .map(|c| c.to_string());
    match &exitcode {
        Some(code) if code == "0" => {}
        Some(_) => mark_error(&mut fields),
        None => {
            tracing::error!(job = %job.job_id, task = task_id, "exit code not set for task");
            mark_error(&mut fields);
        }
    }
    put(&mut fields, "exitcode", exitcode);

    let executable = inv
        .and_then(|i| i.executable.clone())
        .or_else(|| job.submit.executable.clone())
        .or_else(|| is_subdag.then(|| SUBDAG_EXECUTABLE.to_string()))
        .unwrap_or_default();
    put(&mut fields, "executable", executable);

    let argv = match inv {
        Some(i) if i.argv.is_some() => i.argv.clone(),
        _ => job.submit.arguments.clone(),
    };
    put_opt(&mut fields, "argv", argv.filter(|a| !a.is_empty()));
    fields
}

/// Where a job ran, as far as anyone told us.
#[derive(Debug, Clone, Default)]
pub struct HostRecord {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub site: Option<String>,
    pub total_memory: Option<i64>,
    pub uname: Option<String>,
}

impl HostRecord {
    pub fn from_invocation(inv: &Invocation) -> Self {
        Self {
            hostname: inv.hostname.clone(),
            ip: inv.hostaddr.clone(),
            site: inv.resource.clone(),
            total_memory: inv.ram_total,
            uname: inv.uname(),
        }
    }
}

pub fn host_info(job: &JobInstance, host: &HostRecord, ts: Timestamp) -> Fields {
    let mut fields = job_ids(job);
    let unknown = || "unknown".to_string();
    put(&mut fields, "hostname", host.hostname.clone().unwrap_or_else(unknown));
    put(&mut fields, "ip", host.ip.clone().unwrap_or_else(unknown));
    put(&mut fields, "site", host.site.clone().unwrap_or_else(unknown));
    put_opt(&mut fields, "total_memory", host.total_memory);
    put_opt(&mut fields, "uname", host.uname.clone());
    put(&mut fields, "ts", ts);
    fields
}

/// `task.monitoring`: one event per payload entry of the monitoring
/// records carried by task `task_id`. Records from the job's own output
/// files go with the first task.
pub fn task_monitoring(job: &JobInstance, task_id: i64, ts: Timestamp) -> Vec<Fields> {
    let mut out = Vec::new();
    let records = job
        .monitoring_events
        .iter()
        .filter(|record| record.task.unwrap_or(1) == task_id);
    for MonitoringRecord { event, .. } in records {
        let mut base = job_ids(job);
        put(&mut base, "inv__id", task_id);
        put_opt(&mut base, "sched__id", job.sched_id.as_deref());
        let kind = event
            .get("monitoring_event")
            .and_then(Value::as_str)
            .unwrap_or("monitoring.additional");
        put(&mut base, "monitoring_event", kind);
        put(&mut base, "ts", event.get("ts").cloned().unwrap_or_else(|| ts.into()));

        let Some(payload) = event.get("payload").and_then(Value::as_array) else {
            tracing::error!(job = %job.job_id, task = task_id, "monitoring record without payload");
            continue;
        };
        for item in payload {
            let mut fields = base.clone();
            if let Some(map) = item.as_object() {
                for (k, v) in map {
                    fields.insert(k.clone(), v.clone());
                }
            }
            out.push(fields);
        }
    }
    out
}

/// `rc.meta`: one event per metadata attribute of every output file an
/// invocation reported.
pub fn files_metadata(job: &JobInstance, inv: &Invocation, ts: Timestamp) -> Vec<Fields> {
    let mut out = Vec::new();
    for file in &inv.outputs {
        for (key, value) in &file.attributes {
            let mut fields = Fields::new();
            put(&mut fields, "xwf__id", job.wf_uuid.as_str());
            put(&mut fields, "lfn__id", file.lfn.as_str());
            put(&mut fields, "key", key.as_str());
            put(&mut fields, "value", value.as_str());
            put(&mut fields, "ts", ts);
            out.push(fields);
        }
    }
    out
}

/// `int.metric` events, each followed by a `job_inst.tag` when files
/// failed their check.
pub fn integrity(job: &JobInstance, ts: Timestamp) -> Vec<(&'static str, Fields)> {
    let mut out = Vec::new();
    for metric in &job.integrity {
        let mut fields = job_ids(job);
        put(&mut fields, "type", metric.kind.as_str());
        put(&mut fields, "file_type", metric.file_type.as_str());
        put(&mut fields, "count", metric.reported_count());
        put(&mut fields, "duration", metric.duration);
        put(&mut fields, "ts", ts);
        out.push(("int.metric", fields));

        if metric.failed > 0 {
            let mut tag = job_ids(job);
            put(&mut tag, "name", "int.error");
            put(&mut tag, "count", metric.failed);
            put(&mut tag, "ts", ts);
            out.push(("job_inst.tag", tag));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn job() -> JobInstance {
        let mut job = JobInstance::new("wf-1", "preprocess_ID1", PathBuf::from("/run"), 3);
        job.state_ts = Some(1000);
        job.state_seq = 4;
        job
    }

    #[test]
    fn event_key_is_stable_and_distinguishes_attempts() {
        let a = job_brief(&job(), "submit.start", None, None);
        let mut other = job();
        other.submit_seq = 4;
        let b = job_brief(&other, "submit.start", None, None);
        assert_eq!(event_key("job_inst.submit.start", &a), event_key("job_inst.submit.start", &a));
        assert_ne!(event_key("job_inst.submit.start", &a), event_key("job_inst.submit.start", &b));
        assert_eq!(event_key("x", &a).len(), 64);
    }

    #[test]
    fn failing_brief_is_marked_as_error() {
        let fields = job_brief(&job(), "post.end", Some(-1), None);
        assert_eq!(fields["level"], "Error");
        assert_eq!(fields["exitcode"], "None");
        assert_eq!(fields["job_inst__id"], 3);
    }

    #[test]
    fn main_end_without_status_is_an_error() {
        let fields = main_end(&job(), None, Some("alice"));
        assert_eq!(fields["status"], -1);
        assert_eq!(fields["user"], "alice");
        assert_eq!(fields["site"], "");
    }

    #[test]
    fn rotated_output_names_in_main_end() {
        let mut j = job();
        j.submit.output_file = Some("preprocess_ID1.out".into());
        j.kickstart_parsed = true;
        j.output_counter = 2;
        j.stdout_text = Some("x".repeat(20));
        let policy = OutputPolicy {
            original_submit_dir: Some("/submit"),
            include_text: true,
            max_output_length: 5,
        };
        let fields = complete_main_end(&j, Fields::new(), policy);
        assert_eq!(fields["stdout__file"], "preprocess_ID1.out.002");
        assert_eq!(fields["stderr__file"], "");
        assert_eq!(fields["stdout__text"], "xxxxx");
        assert_eq!(fields["work_dir"], "/submit");
    }

    #[test]
    fn synthetic_task_falls_back_to_local_timing() {
        let mut j = job();
        j.main_start = Some(100);
        j.main_done = Some(160);
        j.main_exitcode = Some(0);
        let fields = task_inv_end(&j, 1, None, true);
        assert_eq!(fields["dur"], 60.0);
        assert_eq!(fields["ts"], 160);
        assert_eq!(fields["transformation"], "condor::dagman");
        assert_eq!(fields["executable"], "condor_dagman");
        assert!(!fields.contains_key("level"));
    }

    #[test]
    fn builder_adds_workflow_attributes_except_when_bare() {
        let manifest = Manifest::parse("wf_uuid: wf-1\ndag: blackdiamond-0.dag\nuser: alice\n").unwrap();
        let builder = EventBuilder::new(&manifest, "root-1", 50);
        let event = builder.build("xwf.start", wf_state("wf-1", 60, None, 1, None));
        assert_eq!(event.kind, "stampede.xwf.start");
        assert_eq!(event.get_str("root__xwf__id"), Some("root-1"));
        assert_eq!(event.get_str("wf__user"), Some("alice"));
        assert_eq!(event.get("restart_count"), Some(&Value::from(0)));

        let bare = builder.build_bare("xwf.map.subwf_job", subwf_map("parent", 10, "wf-1", "sub_ID1", 2));
        assert_eq!(bare.get_str("xwf__id"), Some("parent"));
        assert!(bare.get("wf__user").is_none());
        assert!(bare.get_str("event__key").is_some());
    }

    #[test]
    fn output_file_metadata_becomes_rc_meta_rows() {
        let text = "- invocation: true\n  files:\n    f.b2:\n      output: true\n      size: 123\n      sha256: abcd\n      checksum_timing: 0.1\n    f.in:\n      size: 5\n";
        let records = crate::job::kickstart::parse_records(text);
        let Some(crate::job::KickstartRecord::Invocation(inv)) = records.first() else {
            panic!("expected an invocation record, got {records:?}");
        };

        let rows = files_metadata(&job(), inv, 77);
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|f| (f["key"].as_str().unwrap(), f["value"].as_str().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("size", "123"),
                ("checksum.type", "sha256"),
                ("checksum.value", "abcd"),
                ("checksum.timing", "0.1"),
            ]
        );
        assert!(rows.iter().all(|f| f["lfn__id"] == "f.b2" && f["xwf__id"] == "wf-1" && f["ts"] == 77));
    }

    #[test]
    fn monitoring_payloads_stay_with_their_task() {
        let mut j = job();
        let record = |task, name: &str| MonitoringRecord {
            task,
            event: serde_json::json!({"monitoring_event": name, "payload": [{"v": 1}]}),
        };
        j.monitoring_events = vec![record(Some(2), "task.two"), record(None, "job.level")];

        let first = task_monitoring(&j, 1, 5);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["monitoring_event"], "job.level");
        assert_eq!(first[0]["inv__id"], 1);

        let second = task_monitoring(&j, 2, 5);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["monitoring_event"], "task.two");
        assert_eq!(second[0]["v"], 1);
        assert!(task_monitoring(&j, 3, 5).is_empty());
    }
}
