// src/workflow/manifest.rs

//! Static identity of a planned workflow, read from its `braindump.yml`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use serde_yaml::Value;
use tracing::warn;

use crate::errors::MonitordError;
use crate::fs::FileSystem;
use crate::grammar::parse_iso;
use crate::types::Timestamp;

pub const MANIFEST_FILE: &str = "braindump.yml";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub wf_uuid: String,
    pub root_wf_uuid: Option<String>,
    /// DAG file name, relative to the run directory.
    pub dag: String,
    pub label: Option<String>,
    pub index: Option<String>,
    pub dax_version: Option<String>,
    pub dax: Option<String>,
    /// Planning time as epoch seconds.
    pub timestamp: Option<Timestamp>,
    pub submit_dir: Option<String>,
    /// Where the planner wrote the run; paths inside submit files are
    /// relative to this even after the run was moved.
    pub original_submit_dir: Option<String>,
    pub jsd: Option<String>,
    pub planner_version: Option<String>,
    pub planner_arguments: Option<String>,
    pub submit_hostname: Option<String>,
    pub user: Option<String>,
    pub grid_dn: Option<String>,
    pub notify: Option<String>,
    pub properties: Option<String>,
}

impl Manifest {
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Manifest> {
        let text = fs
            .read_to_string(path)
            .map_err(|e| MonitordError::ManifestError(format!("cannot read {}: {e:#}", path.display())))?;
        Self::parse(&text).map_err(|e| match e.downcast::<MonitordError>() {
            Ok(MonitordError::ManifestError(msg)) => {
                MonitordError::ManifestError(format!("{}: {msg}", path.display())).into()
            }
            Ok(other) => other.into(),
            Err(other) => other,
        })
    }

    pub fn parse(text: &str) -> Result<Manifest> {
        let raw: BTreeMap<String, Value> = serde_yaml::from_str(text)?;
        let get = |key: &str| raw.get(key).and_then(scalar);
        let either = |a: &str, b: &str| get(a).or_else(|| get(b));

        let wf_uuid = get("wf_uuid").ok_or_else(|| MonitordError::ManifestError("wf_uuid not specified".into()))?;
        let dag = get("dag").ok_or_else(|| MonitordError::ManifestError("dag not specified".into()))?;

        let timestamp = either("timestamp", "pegasus_wf_time").and_then(|ts| {
            let parsed = parse_iso(&ts);
            if parsed.is_none() {
                warn!(timestamp = %ts, "cannot parse planning timestamp");
            }
            parsed
        });

        let (submit_dir, original_submit_dir) = match get("submit_dir") {
            Some(dir) => {
                let normalized = normalize(&dir);
                (Some(dir), Some(normalized))
            }
            None => {
                let jsd_parent = get("jsd").and_then(|jsd| {
                    Path::new(&normalize(&jsd))
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                });
                (get("run"), jsd_parent)
            }
        };

        Ok(Manifest {
            wf_uuid,
            root_wf_uuid: get("root_wf_uuid"),
            dag,
            label: either("dax_label", "label"),
            index: get("dax_index"),
            dax_version: get("dax_version"),
            dax: get("dax"),
            timestamp,
            submit_dir,
            original_submit_dir,
            jsd: get("jsd"),
            planner_version: either("planner_version", "pegasus_version"),
            planner_arguments: get("planner_arguments"),
            submit_hostname: get("submit_hostname"),
            user: get("user"),
            grid_dn: get("grid_dn"),
            notify: get("notify"),
            properties: get("properties"),
        })
    }

    /// `label-index`, the human name used in notifications and logs.
    pub fn display_id(&self) -> String {
        format!(
            "{}-{}",
            self.label.as_deref().unwrap_or("unknown"),
            self.index.as_deref().unwrap_or("unknown")
        )
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lexical path normalisation: drops `.` and folds `..`, keeps the rest.
pub fn normalize(path: &str) -> String {
    let mut out = PathBuf::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}
