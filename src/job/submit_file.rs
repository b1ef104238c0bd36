// src/job/submit_file.rs

//! Planning metadata read from a job's submit description.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::{Regex, RegexBuilder};

use crate::fs::FileSystem;

const WALLTIME_KEYS: [&str; 3] = ["maxcputime", "maxtime", "maxwalltime"];

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid submit file pattern")
}

static RSL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^\s*globusrsl\W")
        .case_insensitive(true)
        .build()
        .expect("valid submit file pattern")
});
static RSL_PAIR: LazyLock<Regex> = LazyLock::new(|| re(r"\(([^)]+)\)"));
static SITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| re(r#"^\s*\+(?:pegasus|wf)_(?:site|resource)\s*=\s*['"]?([^'"\s]+)['"]?"#));
static SITE_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"^#!\s+site=(\S+)"));
static TRANSFORMATION: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*\+pegasus_wf_xformation\s*=\s*(\S+)"));
static DERIVATION: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*\+pegasus_wf_dax_job_id\s*=\s*(\S+)"));
static CORES: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*\+pegasus_cores\s*=\s*(\S+)"));
static EXECUTABLE: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*executable\s*=\s*(\S+)"));
static ARGUMENTS: LazyLock<Regex> = LazyLock::new(|| re(r#"^\s*arguments\s*=\s*"([^"\r\n]*)""#));
static ENVIRONMENT: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*environment\s*=\s*(.*)"));
static ENV_PROPERTY: LazyLock<Regex> = LazyLock::new(|| re(r"([^:= \t]+)\s*[:=]?\s*(.*)"));
static INPUT: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*input\s*=\s*(\S+)"));
static OUTPUT: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*output\s*=\s*(\S+)"));
static ERROR: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*error\s*=\s*(\S+)"));
static JOB_CLASS: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*\+pegasus_job_class\s*=\s*(\S+)"));

/// Environment key naming the progress log of a nested workflow.
pub const CHILD_LOG_ENV: &str = "_CONDOR_DAGMAN_LOG";

/// Placeholder site name planners leave when no site was chosen.
const UNSET_SITE: &str = "!!SITE!!";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Largest requested time limit, in minutes.
    pub walltime_minutes: Option<i64>,
    pub site: Option<String>,
    pub transformation: Option<String>,
    pub derivation: Option<String>,
    pub executable: Option<String>,
    pub arguments: Option<String>,
    pub multiplier: Option<i64>,
    pub input_file: Option<String>,
    pub output_file: Option<String>,
    pub error_file: Option<String>,
    pub job_class: Option<u8>,
    /// Progress log of the nested workflow a planning job launches.
    pub child_log: Option<String>,
}

/// Jobs that launch a nested planned workflow carry its log in their
/// environment.
pub fn launches_nested_workflow(job_id: &str) -> bool {
    job_id.starts_with("pegasus-plan") || job_id.starts_with("subdax_")
}

pub fn read_submit_file(fs: &dyn FileSystem, path: &Path, job_id: &str) -> Result<SubmitInfo> {
    let text = fs.read_to_string(path)?;
    Ok(parse_submit_text(&text, launches_nested_workflow(job_id)))
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

pub fn parse_submit_text(text: &str, parse_environment: bool) -> SubmitInfo {
    let mut info = SubmitInfo::default();
    let first = |regex: &Regex, line: &str| -> Option<String> {
        regex.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
    };

    for line in text.lines() {
        if RSL_LINE.is_match(line) {
            for caps in RSL_PAIR.captures_iter(line) {
                let Some((key, value)) = caps[1].split_once('=') else {
                    continue;
                };
                let key: String = key.chars().filter(|c| *c != '-' && *c != '_').collect();
                if !WALLTIME_KEYS.contains(&key.trim().to_lowercase().as_str()) {
                    continue;
                }
                if let Ok(value) = value.trim().parse::<i64>() {
                    info.walltime_minutes = Some(info.walltime_minutes.map_or(value, |v| v.max(value)));
                }
            }
        } else if let Some(site) = first(&SITE_KEY, line).or_else(|| first(&SITE_COMMENT, line)) {
            info.site = (site != UNSET_SITE).then_some(site);
        } else if let Some(tr) = first(&TRANSFORMATION, line) {
            info.transformation = Some(unquote(&tr));
        } else if let Some(dv) = first(&DERIVATION, line) {
            let dv = unquote(&dv);
            info.derivation = (dv != "null").then_some(dv);
        } else if let Some(exe) = first(&EXECUTABLE, line) {
            info.executable = Some(unquote(&exe));
        } else if let Some(args) = first(&ARGUMENTS, line) {
            info.arguments = Some(args);
        } else if let Some(cores) = first(&CORES, line) {
            info.multiplier = unquote(&cores).parse().ok();
        } else if let Some(input) = first(&INPUT, line) {
            info.input_file = Some(unquote(&input));
        } else if let Some(output) = first(&OUTPUT, line) {
            info.output_file = Some(unquote(&output));
        } else if let Some(error) = first(&ERROR, line) {
            info.error_file = Some(unquote(&error));
        } else if let (true, Some(env)) = (parse_environment, first(&ENVIRONMENT, line)) {
            info.child_log = child_log_from_environment(&env);
        } else if let Some(class) = first(&JOB_CLASS, line) {
            info.job_class = unquote(&class).parse().ok();
        }
    }

    info
}

/// Find the nested workflow log in a submit `environment` value. Quoted
/// values are space separated, bare ones `;` separated.
pub fn child_log_from_environment(value: &str) -> Option<String> {
    let stripped = value.strip_prefix('"').unwrap_or(value);
    let stripped = stripped.strip_suffix('"').unwrap_or(stripped);
    let quoted = stripped.len() != value.len();

    let separator = if quoted { ' ' } else { ';' };
    stripped
        .split(separator)
        .map(str::trim)
        .filter(|prop| !prop.is_empty())
        .filter_map(|prop| ENV_PROPERTY.captures(prop))
        .find(|caps| &caps[1] == CHILD_LOG_ENV)
        .map(|caps| caps[2].trim().to_string())
}

/// Human label for the numeric job class a planner stamps on a job.
pub fn job_class_name(class: Option<u8>) -> &'static str {
    match class {
        Some(0) => "unassigned",
        Some(1) => "compute",
        Some(2) => "stage-in-tx",
        Some(3) => "stage-out-tx",
        Some(4) => "registration",
        Some(5) => "inter-site-tx",
        Some(6) => "create-dir",
        Some(7) => "stage_worker_tx",
        Some(8) => "cleanup",
        Some(9) => "chmod",
        Some(10) => "dax",
        Some(11) => "dag",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = r#"universe = vanilla
executable = /usr/bin/pegasus-kickstart
arguments = "-n diamond::analyze -N ID4 /bin/keg"
globusrsl = (jobtype=single)(max_wall_time=20)(maxcputime=5)
+pegasus_site = "condorpool"
+pegasus_wf_xformation = "diamond::analyze:4.0"
+pegasus_wf_dax_job_id = "ID4"
+pegasus_cores = 4
+pegasus_job_class = 1
output = analyze_ID4.out
error = analyze_ID4.err
"#;

    #[test]
    fn reads_planning_fields() {
        let info = parse_submit_text(SUB, false);
        assert_eq!(info.walltime_minutes, Some(20));
        assert_eq!(info.site.as_deref(), Some("condorpool"));
        assert_eq!(info.transformation.as_deref(), Some("diamond::analyze:4.0"));
        assert_eq!(info.derivation.as_deref(), Some("ID4"));
        assert_eq!(info.arguments.as_deref(), Some("-n diamond::analyze -N ID4 /bin/keg"));
        assert_eq!(info.multiplier, Some(4));
        assert_eq!(info.job_class, Some(1));
        assert_eq!(info.output_file.as_deref(), Some("analyze_ID4.out"));
        assert_eq!(job_class_name(info.job_class), "compute");
    }

    #[test]
    fn placeholder_site_is_dropped() {
        let info = parse_submit_text("+wf_resource = \"!!SITE!!\"\n", false);
        assert_eq!(info.site, None);
    }

    #[test]
    fn nested_log_from_environment() {
        let quoted = r#"environment = "PATH=/bin _CONDOR_DAGMAN_LOG=/run/sub/inner-0.dag.dagman.out""#;
        let info = parse_submit_text(quoted, true);
        assert_eq!(info.child_log.as_deref(), Some("/run/sub/inner-0.dag.dagman.out"));

        let bare = "environment = PATH=/bin;_CONDOR_DAGMAN_LOG=/run/x.dagman.out";
        assert_eq!(
            child_log_from_environment(bare.trim_start_matches("environment = ")),
            Some("/run/x.dagman.out".to_string())
        );
    }
}
