// src/job/instance.rs

//! One execution attempt of a named job.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, error, trace, warn};

use crate::fs::FileSystem;
use crate::grammar::parse_iso;
use crate::job::kickstart::{self, IntegrityMetric, KickstartRecord};
use crate::job::state::{JobState, regular_to_raw};
use crate::job::submit_file::{SubmitInfo, job_class_name};
use crate::sink::Fields;
use crate::types::Timestamp;

/// Jobs whose id starts with this never leave `.out`/`.err` files behind.
pub const NOOP_JOB_PREFIX: &str = "noop_";

const PAYLOAD_START: &str = "@@@MONITORING_PAYLOAD - START@@@";
const PAYLOAD_END: &str = "@@@MONITORING_PAYLOAD - END@@@";

/// Headroom kept below the output cap when reading whole files.
const READ_HEADROOM: usize = 2000;

static LITE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*Executing on host\s*(\S+)(?:\s*IP=(\S+))*.*$").expect("valid host pattern")
});

/// A monitoring payload and the task whose output carried it. Payloads
/// found in the job's own `.out`/`.err` files belong to no task.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringRecord {
    pub task: Option<i64>,
    pub event: JsonValue,
}

#[derive(Debug, Clone)]
pub struct JobInstance {
    pub wf_uuid: String,
    pub job_id: String,
    pub submit_seq: u32,
    /// Directory holding the job's submit, output and error files.
    pub submit_dir: PathBuf,
    pub sched_id: Option<String>,
    pub site: Option<String>,
    pub host_id: Option<String>,
    pub host_ip: Option<String>,
    pub remote_user: Option<String>,
    pub remote_cwd: Option<String>,
    pub cluster_start: Option<Timestamp>,
    pub cluster_duration: Option<f64>,

    pub state: Option<JobState>,
    pub state_seq: u32,
    pub state_ts: Option<Timestamp>,
    /// Attempt counter used for rotated `.NNN` output names.
    pub output_counter: u32,

    pub pre_start: Option<Timestamp>,
    pub pre_done: Option<Timestamp>,
    pub pre_exitcode: Option<i32>,
    pub main_start: Option<Timestamp>,
    pub main_done: Option<Timestamp>,
    pub main_exitcode: Option<i32>,
    pub post_start: Option<Timestamp>,
    pub post_done: Option<Timestamp>,
    pub post_exitcode: Option<i32>,

    pub submit: SubmitInfo,

    pub stdout_text: Option<String>,
    pub stderr_text: Option<String>,
    /// JSON payloads embedded in task output between monitoring markers.
    pub monitoring_events: Vec<MonitoringRecord>,
    pub multipart_events: Vec<JsonValue>,
    pub cpu_attribs: Option<JsonValue>,
    pub integrity: Vec<IntegrityMetric>,

    pub kickstart_parsed: bool,
    pub has_rotated_files: bool,

    /// `main.end` fields held back until the post-script finishes.
    pub deferred_end: Option<Fields>,
    pub main_end_sent: bool,
}

impl JobInstance {
    pub fn new(wf_uuid: &str, job_id: &str, submit_dir: PathBuf, submit_seq: u32) -> Self {
        Self {
            wf_uuid: wf_uuid.to_string(),
            job_id: job_id.to_string(),
            submit_seq,
            submit_dir,
            sched_id: None,
            site: None,
            host_id: None,
            host_ip: None,
            remote_user: None,
            remote_cwd: None,
            cluster_start: None,
            cluster_duration: None,
            state: None,
            state_seq: 0,
            state_ts: None,
            output_counter: 0,
            pre_start: None,
            pre_done: None,
            pre_exitcode: None,
            main_start: None,
            main_done: None,
            main_exitcode: None,
            post_start: None,
            post_done: None,
            post_exitcode: None,
            submit: SubmitInfo::default(),
            stdout_text: None,
            stderr_text: None,
            monitoring_events: Vec::new(),
            multipart_events: Vec::new(),
            cpu_attribs: None,
            integrity: Vec::new(),
            kickstart_parsed: false,
            has_rotated_files: false,
            deferred_end: None,
            main_end_sent: false,
        }
    }

    /// Record a state change and the timing or exit code it implies.
    pub fn set_state(&mut self, state: JobState, sched_id: Option<&str>, ts: Timestamp, status: Option<i32>) {
        self.state_ts = Some(ts);
        self.state_seq += 1;
        if self.sched_id.is_none() {
            self.sched_id = sched_id.map(str::to_string);
        }

        let raw = status.map(regular_to_raw);
        match state {
            JobState::PreScriptStarted => self.pre_start = Some(ts),
            JobState::PreScriptSuccess | JobState::PreScriptFailure => {
                self.pre_done = Some(ts);
                self.pre_exitcode = raw;
            }
            JobState::PostScriptStarted => self.post_start = Some(ts),
            JobState::PostScriptTerminated => self.post_done = Some(ts),
            JobState::Execute => self.main_start = Some(ts),
            JobState::JobTerminated => self.main_done = Some(ts),
            // Aborted or never submitted: no termination line will follow.
            JobState::JobAborted
            | JobState::SubmitFailed
            | JobState::GlobusSubmitFailed
            | JobState::GridSubmitFailed => self.main_done = Some(ts),
            JobState::JobSuccess | JobState::JobFailure => self.main_exitcode = raw,
            JobState::PostScriptSuccess | JobState::PostScriptFailure => {
                self.post_exitcode = raw;
                if self.main_done.is_none() {
                    self.main_done = Some(ts);
                }
            }
            _ => {}
        }
        self.state = Some(state);
    }

    pub fn apply_submit_info(&mut self, info: SubmitInfo) {
        if info.site.is_some() {
            self.site = info.site.clone();
        }
        self.submit = info;
    }

    pub fn is_noop(&self) -> bool {
        self.job_id.starts_with(NOOP_JOB_PREFIX)
    }

    pub fn jobtype(&self) -> &'static str {
        job_class_name(self.submit.job_class)
    }

    fn rotation_suffix(&self) -> String {
        if self.has_rotated_files {
            format!(".{:03}", self.output_counter)
        } else {
            String::new()
        }
    }

    /// Output file name as it sits on disk for this attempt.
    pub fn rotated_out_name(&self) -> Option<String> {
        let base = self.submit.output_file.as_ref()?;
        Some(format!("{base}{}", self.rotation_suffix()))
    }

    pub fn rotated_err_name(&self) -> Option<String> {
        let base = self.submit.error_file.as_ref()?;
        Some(format!("{base}{}", self.rotation_suffix()))
    }

    pub fn out_path(&self) -> PathBuf {
        self.submit_dir.join(format!("{}.out{}", self.job_id, self.rotation_suffix()))
    }

    pub fn err_path(&self) -> PathBuf {
        self.submit_dir.join(format!("{}.err{}", self.job_id, self.rotation_suffix()))
    }

    pub fn int_error_count(&self) -> u64 {
        self.integrity.iter().map(|m| m.failed).sum()
    }

    pub fn add_integrity_metric(&mut self, metric: Option<IntegrityMetric>) {
        if let Some(metric) = metric {
            kickstart::merge_metric(&mut self.integrity, metric);
        }
    }

    /// Read the job's stderr file, keeping its text and any host line a
    /// wrapper printed.
    pub fn read_error_file(&mut self, fs: &dyn FileSystem, max_len: usize) {
        if self.submit.error_file.is_none() {
            self.stderr_text = None;
            return;
        }
        let path = self.err_path();
        match fs.read_to_string(&path) {
            Ok(text) => {
                let (data, events) = split_task_output(&text);
                self.absorb_monitoring_events(events, None);
                if let Some(caps) = LITE_HOST.captures(&data) {
                    self.host_id = Some(caps[1].to_string());
                    self.host_ip = caps.get(2).map(|m| m.as_str().to_string());
                }
                self.stderr_text = Some(clip(&data, max_len.saturating_sub(READ_HEADROOM)).to_string());
            }
            Err(err) => {
                self.stderr_text = None;
                if !self.is_noop() {
                    warn!(job = %self.job_id, path = %path.display(), error = %err, "unable to read error file, continuing");
                }
            }
        }
    }

    /// Read the plain stdout file of a job without structured records.
    pub fn read_output_file(&mut self, fs: &dyn FileSystem, path: Option<&Path>, max_len: usize) {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.out_path());
        match fs.read_to_string(&path) {
            Ok(text) => {
                let (data, events) = split_task_output(&text);
                self.absorb_monitoring_events(events, None);
                let data = clip(&data, max_len.saturating_sub(READ_HEADROOM));
                self.stdout_text = Some(format!("#@ 1 stdout\n{data}"));
            }
            Err(err) => {
                self.stdout_text = None;
                if !self.is_noop() {
                    warn!(job = %self.job_id, path = %path.display(), error = %err, "unable to read output file, continuing");
                }
            }
        }
    }

    /// Pull job-level facts out of the parsed output records. Returns
    /// whether an invocation record was present.
    pub fn absorb_records(&mut self, records: &mut [KickstartRecord], max_len: usize) -> bool {
        self.kickstart_parsed = true;
        let mut found = false;
        let mut task = 0;
        let mut text = String::new();

        for record in records.iter_mut() {
            let inv = match record {
                KickstartRecord::Multipart(value) => {
                    self.absorb_multipart(value);
                    continue;
                }
                KickstartRecord::Invocation(inv) => inv,
                _ => continue,
            };
            task += 1;

            if !found {
                if inv.resource.is_some() {
                    self.site = inv.resource.clone();
                }
                self.remote_user = inv.user.clone();
                self.remote_cwd = inv.cwd.clone();
                found = true;
            }

            if let Some(reported) = inv.hostname.clone() {
                match &self.host_id {
                    None => self.host_id = Some(reported),
                    Some(known) if *known != reported => {
                        trace!(job = %self.job_id, known = %known, reported = %reported, "keeping wrapper reported host");
                        inv.hostname = Some(known.clone());
                        if self.host_ip.is_some() {
                            inv.hostaddr = self.host_ip.clone();
                        }
                    }
                    Some(_) => {}
                }
            }

            if let Some(stdout) = &inv.stdout {
                let (data, events) = split_task_output(stdout);
                self.absorb_monitoring_events(events, Some(i64::from(task)));
                append_snippet(&mut text, task, "stdout", &data, max_len);
            }
            if let Some(stderr) = &inv.stderr {
                let (data, events) = split_task_output(stderr);
                self.absorb_monitoring_events(events, Some(i64::from(task)));
                let data = format!("{}{}", inv.signal_message(), data);
                append_snippet(&mut text, task, "stderr", &data, max_len);
            }
        }
        self.stdout_text = Some(text);

        if !found {
            debug!(job = %self.job_id, "no invocation record in output");
        }

        let summary = records.iter().find_map(|r| match r {
            KickstartRecord::ClusterSummary(props) => Some(props),
            _ => None,
        });
        match summary {
            Some(props) => {
                self.cluster_duration = props.get("duration").and_then(|d| d.parse().ok());
                if let Some(start) = props.get("start").and_then(|s| parse_iso(s)) {
                    self.cluster_start = Some(start);
                }
            }
            None => debug!(job = %self.job_id, "no cluster record in output"),
        }

        found
    }

    fn absorb_multipart(&mut self, value: &serde_yaml::Value) {
        if let Some(metric) = kickstart::integrity_from_multipart(value) {
            kickstart::merge_metric(&mut self.integrity, metric);
            return;
        }
        match serde_json::to_value(value) {
            Ok(json) => self.multipart_events.push(json),
            Err(err) => error!(job = %self.job_id, error = %err, "multipart record cannot be carried"),
        }
    }

    fn absorb_monitoring_events(&mut self, events: Vec<JsonValue>, task: Option<i64>) {
        for event in events {
            let is_metric = event.get("monitoring_event").and_then(JsonValue::as_str) == Some("int.metric");
            if !is_metric {
                self.monitoring_events.push(MonitoringRecord { task, event });
                continue;
            }
            let Some(payload) = event.get("payload").and_then(JsonValue::as_array) else {
                continue;
            };
            for m in payload {
                let num = |key: &str| m.get(key).and_then(JsonValue::as_f64).unwrap_or(0.0);
                let text = |key: &str| m.get(key).and_then(JsonValue::as_str).unwrap_or_default().to_string();
                kickstart::merge_metric(
                    &mut self.integrity,
                    IntegrityMetric {
                        kind: text("event"),
                        file_type: text("file_type"),
                        count: num("count") as u64,
                        succeeded: num("succeeded") as u64,
                        failed: num("failed") as u64,
                        duration: num("duration"),
                    },
                );
            }
        }
    }

    /// `main.end` fields plus the per-attempt summary used by the
    /// composite event.
    pub fn composite_fields(&self, end_fields: &Fields) -> Fields {
        let mut fields = end_fields.clone();
        fields.insert("int_error_count".into(), self.int_error_count().into());
        if let Some(host) = &self.host_id {
            fields.insert("hostname".into(), host.clone().into());
        }
        let jobtype = self.jobtype();
        if jobtype == "unknown" || jobtype == "unassigned" {
            warn!(job = %self.job_id, jobtype, "job has unknown type");
        }
        fields.insert("jobtype".into(), jobtype.into());

        if let Some(JsonValue::Object(cpu)) = &self.cpu_attribs {
            for (k, v) in cpu {
                fields.insert(k.clone(), v.clone());
            }
        }

        for MonitoringRecord { event, .. } in &self.monitoring_events {
            if event.get("monitoring_event").and_then(JsonValue::as_str) != Some("metadata") {
                continue;
            }
            let entries = event.get("payload").and_then(JsonValue::as_array).into_iter().flatten();
            for entry in entries {
                match (entry.get("name").and_then(JsonValue::as_str), entry.get("value")) {
                    (Some(name), Some(value)) => {
                        fields.insert(format!("metadata__{name}"), value.clone());
                    }
                    _ => error!(job = %self.job_id, "metadata payload entries need a name and a value"),
                }
            }
        }

        for event in &self.multipart_events {
            let Some(map) = event.as_object() else { continue };
            for (key, value) in map {
                if key == "multipart" {
                    continue;
                }
                match (fields.get_mut(key), value) {
                    (Some(JsonValue::Array(existing)), JsonValue::Array(more)) => {
                        existing.extend(more.iter().cloned());
                    }
                    _ => {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        fields
    }
}

/// Separate user output from JSON monitoring payloads embedded between
/// start/end markers.
pub fn split_task_output(text: &str) -> (String, Vec<JsonValue>) {
    let mut data = String::with_capacity(text.len());
    let mut events = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(PAYLOAD_START) {
        data.push_str(&rest[..start]);
        let after = &rest[start + PAYLOAD_START.len()..];
        let Some(end) = after.find(PAYLOAD_END) else {
            error!("monitoring payload without an end marker");
            rest = after;
            break;
        };
        let payload = &after[..end];
        match serde_json::from_str(payload) {
            Ok(event) => events.push(event),
            Err(err) => error!(payload, error = %err, "unable to convert monitoring payload to JSON"),
        }
        rest = &after[end + PAYLOAD_END.len()..];
    }
    data.push_str(rest);
    (data, events)
}

fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn append_snippet(buf: &mut String, task: u32, kind: &str, data: &str, max_len: usize) {
    // Each section costs roughly this much on top of its data.
    const SECTION_OVERHEAD: usize = 20;
    let remaining = max_len.saturating_sub(buf.len() + SECTION_OVERHEAD);
    if remaining == 0 {
        return;
    }
    if data.len() > remaining {
        debug!(task, kind, remaining, "only keeping part of task output");
    }
    buf.push_str(&format!("#@ {task} {kind}\n"));
    buf.push_str(clip(data, remaining));
    buf.push('\n');
}
