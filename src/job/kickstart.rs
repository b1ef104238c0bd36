// src/job/kickstart.rs

//! Reader for the structured records a job wrapper leaves in its `.out`
//! file: YAML invocation records, single-line cluster summaries and task
//! lines, and YAML multipart metadata blocks.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;
use tracing::{debug, warn};

const INVOCATION_TOKEN: &str = "- invocation:";
const MULTIPART_TOKEN: &str = "---------------pegasus-multipart";
const SUMMARY_TOKENS: [&str; 2] = ["[cluster-summary", "[seqexec-summary"];
const TASK_TOKENS: [&str; 2] = ["[cluster-task", "[seqexec-task"];

static QUOTED_PROP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\S+)\s*=\s*"([^"]+)""#).expect("valid pattern"));
static PLAIN_PROP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\S+)\s*=\s*([^",\]]+)"#).expect("valid pattern"));

/// One record found in a job output file.
#[derive(Debug, Clone, PartialEq)]
pub enum KickstartRecord {
    Invocation(Box<Invocation>),
    ClusterSummary(BTreeMap<String, String>),
    ClusterTask(BTreeMap<String, String>),
    Multipart(Value),
}

/// The fields of an invocation record the monitor reports on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub hostname: Option<String>,
    pub resource: Option<String>,
    pub user: Option<String>,
    pub hostaddr: Option<String>,
    pub transformation: Option<String>,
    pub derivation: Option<String>,
    pub duration: Option<f64>,
    pub start: Option<String>,
    pub utime: Option<f64>,
    pub stime: Option<f64>,
    pub maxrss: Option<i64>,
    pub ram_total: Option<i64>,
    pub uname_system: Option<String>,
    pub uname_release: Option<String>,
    pub uname_machine: Option<String>,
    pub executable: Option<String>,
    pub argv: Option<String>,
    pub raw: Option<i32>,
    pub exitcode: Option<i32>,
    pub signal: Option<i32>,
    pub signal_action: Option<String>,
    pub cwd: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Files the invocation marked as outputs, in record order.
    pub outputs: Vec<OutputFile>,
}

/// Metadata an invocation reported for one of its output files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputFile {
    pub lfn: String,
    /// Attribute name and value pairs (`size`, `checksum.value`, ...).
    pub attributes: Vec<(String, String)>,
}

impl OutputFile {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn from_yaml(lfn: String, meta: &Value) -> Self {
        let mut file = OutputFile {
            lfn,
            attributes: Vec::new(),
        };
        for key in ["user", "size", "ctime"] {
            if let Some(value) = text_at(meta, &[key]) {
                file.attributes.push((key.to_string(), value));
            }
        }
        if let Some(sum) = text_at(meta, &["sha256"]) {
            file.attributes.push(("checksum.type".into(), "sha256".into()));
            file.attributes.push(("checksum.value".into(), sum));
            if let Some(timing) = text_at(meta, &["checksum_timing"]) {
                file.attributes.push(("checksum.timing".into(), timing));
            }
        }
        file
    }
}

impl Invocation {
    pub fn uname(&self) -> Option<String> {
        match (&self.uname_system, &self.uname_release, &self.uname_machine) {
            (Some(s), Some(r), Some(m)) => Some(format!("{s}-{r}-{m}")),
            _ => None,
        }
    }

    /// Prefix for the stderr text when the main job died from a signal.
    pub fn signal_message(&self) -> String {
        if self.signal.is_none() && self.signal_action.is_none() {
            return " ".to_string();
        }
        let mut msg = String::from("Job was ");
        if let Some(action) = &self.signal_action {
            msg.push_str(action);
        }
        if let Some(signal) = self.signal {
            msg.push_str(&format!(" with signal {signal}"));
        }
        msg
    }
}

/// Split a job output file into records.
pub fn parse_records(text: &str) -> Vec<KickstartRecord> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut records = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;

        if let Some(start) = line.find(INVOCATION_TOKEN) {
            let mut buf = String::from(&line[start..]);
            idx = collect_block(&lines, idx, &mut buf);
            if let Some(inv) = parse_invocation(&buf) {
                records.push(KickstartRecord::Invocation(Box::new(inv)));
            }
        } else if line.starts_with(MULTIPART_TOKEN) {
            let mut buf = String::new();
            idx = collect_block(&lines, idx, &mut buf);
            records.extend(parse_multipart(&buf));
        } else if let Some(body) = single_line(line, &SUMMARY_TOKENS) {
            records.push(KickstartRecord::ClusterSummary(parse_props(body)));
        } else if let Some(body) = single_line(line, &TASK_TOKENS) {
            records.push(KickstartRecord::ClusterTask(parse_props(body)));
        }
    }

    records
}

/// Append continuation lines of a YAML block; returns the next unread index.
fn collect_block(lines: &[&str], mut idx: usize, buf: &mut String) -> usize {
    while idx < lines.len() {
        let line = lines[idx];
        if line.starts_with("[cluster-") || line.starts_with(MULTIPART_TOKEN) {
            break;
        }
        if line.starts_with([' ', '-', '\n']) {
            buf.push_str(line);
        }
        idx += 1;
    }
    idx
}

fn single_line<'a>(line: &'a str, tokens: &[&str]) -> Option<&'a str> {
    let start = tokens.iter().filter_map(|t| line.find(t)).min()?;
    let rest = &line[start..];
    match rest.find(']') {
        Some(end) => Some(&rest[..=end]),
        None => {
            warn!(line = %line.trim_end(), "cluster line is malformed, ignoring it");
            None
        }
    }
}

fn parse_props(body: &str) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for caps in QUOTED_PROP.captures_iter(body) {
        props.insert(caps[1].to_string(), caps[2].to_string());
    }
    for caps in PLAIN_PROP.captures_iter(body) {
        props
            .entry(caps[1].to_string())
            .or_insert_with(|| caps[2].trim().to_string());
    }
    props
}

fn parse_invocation(buf: &str) -> Option<Invocation> {
    let doc: Value = match serde_yaml::from_str(buf) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(error = %err, "yaml error in invocation record");
            return None;
        }
    };
    let first = doc.as_sequence()?.first()?;
    // Records are usually `- invocation: true` followed by sibling keys.
    let entry = match first.get("invocation") {
        Some(nested) if nested.is_mapping() => nested,
        _ => first,
    };

    let mut inv = Invocation {
        hostname: text_at(entry, &["hostname"]),
        resource: text_at(entry, &["resource"]),
        user: text_at(entry, &["user"]),
        hostaddr: text_at(entry, &["hostaddr"]),
        transformation: text_at(entry, &["transformation"]),
        derivation: text_at(entry, &["derivation"]),
        duration: float_at(entry, &["mainjob", "duration"]),
        start: text_at(entry, &["mainjob", "start"]),
        utime: float_at(entry, &["mainjob", "usage", "utime"]),
        stime: float_at(entry, &["mainjob", "usage", "stime"]),
        maxrss: float_at(entry, &["mainjob", "usage", "maxrss"]).map(|v| v as i64),
        ram_total: float_at(entry, &["machine", "ram_total"]).map(|v| v as i64),
        uname_system: text_at(entry, &["machine", "uname_system"]),
        uname_release: text_at(entry, &["machine", "uname_release"]),
        uname_machine: text_at(entry, &["machine", "uname_machine"]),
        executable: text_at(entry, &["mainjob", "executable", "file_name"]),
        argv: argv_at(entry),
        raw: float_at(entry, &["mainjob", "status", "raw"]).map(|v| v as i32),
        exitcode: float_at(entry, &["mainjob", "status", "regular_exitcode"]).map(|v| v as i32),
        signal: float_at(entry, &["mainjob", "status", "signalled_signal"]).map(|v| v as i32),
        signal_action: text_at(entry, &["mainjob", "status", "signalled_name"]),
        cwd: text_at(entry, &["cwd"]),
        stdout: text_at(entry, &["files", "stdout", "data"]),
        stderr: text_at(entry, &["files", "stderr", "data"]),
        outputs: Vec::new(),
    };

    if let Some(files) = entry.get("files").and_then(Value::as_mapping) {
        for (lfn, meta) in files {
            if !bool_at(meta, &["output"]).unwrap_or(false) {
                continue;
            }
            let Some(lfn) = lfn.as_str() else {
                debug!(?lfn, "output file name is not a string, skipping");
                continue;
            };
            inv.outputs.push(OutputFile::from_yaml(lfn.to_string(), meta));
        }
    }

    Some(inv)
}

fn parse_multipart(buf: &str) -> Vec<KickstartRecord> {
    match serde_yaml::from_str::<Value>(buf) {
        Ok(Value::Sequence(entries)) => entries.into_iter().map(KickstartRecord::Multipart).collect(),
        Ok(other) => {
            debug!(?other, "multipart record is not a list");
            Vec::new()
        }
        Err(err) => {
            warn!(error = %err, "yaml error in multipart record");
            Vec::new()
        }
    }
}

fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    match value_at(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn argv_at(entry: &Value) -> Option<String> {
    let args = value_at(entry, &["mainjob", "argument_vector"])?.as_sequence()?;
    let joined = args
        .iter()
        .filter_map(|arg| match arg {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn bool_at(value: &Value, path: &[&str]) -> Option<bool> {
    match value_at(value, path)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

fn float_at(value: &Value, path: &[&str]) -> Option<f64> {
    match value_at(value, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integrity check totals attached to a job.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityMetric {
    pub kind: String,
    pub file_type: String,
    pub count: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duration: f64,
}

impl IntegrityMetric {
    pub fn reported_count(&self) -> u64 {
        if self.count > 0 {
            self.count
        } else {
            self.succeeded + self.failed
        }
    }

    fn same_key(&self, other: &IntegrityMetric) -> bool {
        self.kind == other.kind && self.file_type == other.file_type
    }
}

/// Fold a metric into a list, merging entries of the same kind/file type.
pub fn merge_metric(metrics: &mut Vec<IntegrityMetric>, metric: IntegrityMetric) {
    match metrics.iter_mut().find(|m| m.same_key(&metric)) {
        Some(existing) => {
            existing.count += metric.count;
            existing.succeeded += metric.succeeded;
            existing.failed += metric.failed;
            existing.duration += metric.duration;
        }
        None => metrics.push(metric),
    }
}

/// Verification summary carried by a multipart record, if any.
pub fn integrity_from_multipart(value: &Value) -> Option<IntegrityMetric> {
    let summary = value.get("integrity_summary")?;
    let num = |key: &str| float_at(summary, &[key]).unwrap_or(0.0);
    Some(IntegrityMetric {
        kind: "check".to_string(),
        file_type: "input".to_string(),
        count: 0,
        succeeded: num("succeeded") as u64,
        failed: num("failed") as u64,
        duration: num("duration"),
    })
}

/// Checksum computation totals for the outputs of one invocation.
pub fn integrity_from_outputs(inv: &Invocation) -> Option<IntegrityMetric> {
    let timings: Vec<f64> = inv
        .outputs
        .iter()
        .filter_map(|file| file.attribute("checksum.timing")?.parse().ok())
        .collect();
    if timings.is_empty() {
        return None;
    }
    Some(IntegrityMetric {
        kind: "compute".to_string(),
        file_type: "output".to_string(),
        count: timings.len() as u64,
        succeeded: 0,
        failed: 0,
        duration: timings.iter().sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"- invocation: true
  version: 3.0
  start: 2020-01-02T10:00:00.000-00:00
  duration: 1.5
  transformation: "diamond::preprocess:4.0"
  derivation: "ID0000001"
  resource: "condorpool"
  hostaddr: 10.0.0.5
  hostname: worker1
  user: alice
  cwd: /scratch/wf
  mainjob:
    start: 2020-01-02T10:00:00.100-00:00
    duration: 1.2
    status:
      raw: 256
      regular_exitcode: 1
    executable:
      file_name: /usr/bin/pegasus-keg
    usage:
      utime: 0.5
      stime: 0.25
      maxrss: 2048
  machine:
    ram_total: 16384
    uname_system: linux
    uname_release: 5.4
    uname_machine: x86_64
  files:
    stdout:
      data: "hello"
    f.a:
      size: 10
    f.b1:
      output: True
      size: 123
      user: alice
      sha256: 4a77bee2
      checksum_timing: 0.25
---------------pegasus-multipart
- integrity_summary:
    succeeded: 2
    failed: 1
    duration: 0.5
[cluster-summary stat="ok", lines=3, tasks=2, succeeded=2, failed=0, extra=0, duration=4.000, start="2020-01-02T10:00:00.000-00:00", pid=7, app="/bin/pegasus-cluster"]
"#;

    #[test]
    fn reads_every_record_kind() {
        let records = parse_records(SAMPLE);
        assert_eq!(records.len(), 3);

        let KickstartRecord::Invocation(inv) = &records[0] else {
            panic!("expected invocation first, got {:?}", records[0]);
        };
        assert_eq!(inv.hostname.as_deref(), Some("worker1"));
        assert_eq!(inv.raw, Some(256));
        assert_eq!(inv.exitcode, Some(1));
        assert_eq!(inv.duration, Some(1.2));
        assert_eq!(inv.uname().as_deref(), Some("linux-5.4-x86_64"));
        assert_eq!(inv.stdout.as_deref(), Some("hello"));
        assert_eq!(inv.outputs.len(), 1);
        assert_eq!(inv.outputs[0].lfn, "f.b1");
        assert_eq!(inv.outputs[0].attribute("size"), Some("123"));
        assert_eq!(inv.outputs[0].attribute("checksum.value"), Some("4a77bee2"));
        let compute = integrity_from_outputs(inv).expect("checksum timing");
        assert_eq!((compute.count, compute.duration), (1, 0.25));

        let KickstartRecord::Multipart(part) = &records[1] else {
            panic!("expected multipart record");
        };
        let metric = integrity_from_multipart(part).expect("integrity summary");
        assert_eq!((metric.succeeded, metric.failed), (2, 1));
        assert_eq!(metric.reported_count(), 3);

        let KickstartRecord::ClusterSummary(props) = &records[2] else {
            panic!("expected cluster summary");
        };
        assert_eq!(props.get("duration").map(String::as_str), Some("4.000"));
        assert_eq!(props.get("app").map(String::as_str), Some("/bin/pegasus-cluster"));
    }

    #[test]
    fn metrics_with_same_key_merge() {
        let mut metrics = Vec::new();
        let one = IntegrityMetric {
            kind: "check".into(),
            file_type: "input".into(),
            count: 0,
            succeeded: 1,
            failed: 0,
            duration: 0.5,
        };
        merge_metric(&mut metrics, one.clone());
        merge_metric(&mut metrics, one);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].succeeded, 2);
    }

    #[test]
    fn checksum_timing_needs_a_checksum() {
        let inv = Invocation {
            outputs: vec![OutputFile::from_yaml(
                "f.c".into(),
                &serde_yaml::from_str("output: true\nchecksum_timing: 0.5\n").unwrap(),
            )],
            ..Invocation::default()
        };
        assert!(inv.outputs[0].attributes.is_empty());
        assert!(integrity_from_outputs(&inv).is_none());
    }

    #[test]
    fn empty_output_has_no_records() {
        assert!(parse_records("plain stdout\nnothing structured\n").is_empty());
    }
}
