// src/workflow/subworkflow.rs

//! Locating the progress log of a nested workflow.
//!
//! Nested workflows are planned into `<dir>.NNN` directories, one per
//! attempt of the parent job. A rescue run reuses `<dir>.000`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::workflow::manifest::normalize;

/// A nested workflow discovered through a job of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubworkflowLink {
    /// Progress log to follow.
    pub log: PathBuf,
    pub parent_wf_uuid: String,
    pub root_wf_uuid: String,
    pub parent_job: String,
    pub parent_seq: u32,
    /// Directory the attempt counter was recorded for.
    pub retry_dir: PathBuf,
    pub retry: u32,
}

/// Map the log path a job announced onto this run's directory tree and
/// pick the attempt directory.
///
/// Returns the log path and the base directory the retry applies to, or
/// `None` when no attempt directory exists.
pub fn resolve_log(
    fs: &dyn FileSystem,
    announced: &str,
    run_dir: &Path,
    original_submit_dir: Option<&str>,
    retry: u32,
) -> Option<(PathBuf, PathBuf)> {
    let mut log = normalize(announced);

    if let Some(orig) = original_submit_dir.filter(|o| !o.is_empty()) {
        if log.contains(orig) {
            let prefix = format!("{}/", orig.trim_end_matches('/'));
            let relative = normalize(&log.replacen(&prefix, "", 1));
            log = run_dir.join(relative).display().to_string();
        }
    }

    let log = PathBuf::from(log);
    let dir = log.parent().map(Path::to_path_buf).unwrap_or_default();
    let file = log.file_name()?.to_owned();

    let attempt = attempt_dir(&dir, retry);
    let chosen = if fs.is_dir(&attempt) {
        attempt
    } else {
        debug!(dir = %attempt.display(), "sub-workflow directory does not exist, shifting to rescue mode");
        let rescue = attempt_dir(&dir, 0);
        if !fs.is_dir(&rescue) {
            warn!(dir = %rescue.display(), "sub-workflow directory does not exist, skipping this sub-workflow");
            return None;
        }
        rescue
    };

    Some((chosen.join(file), dir))
}

fn attempt_dir(dir: &Path, retry: u32) -> PathBuf {
    let mut os = dir.as_os_str().to_owned();
    os.push(format!(".{retry:03}"));
    PathBuf::from(os)
}
