// src/recovery/retries.rs

//! Attempt counters of nested workflow directories, kept across daemon
//! restarts as `<dir> <count>` lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::fs::FileSystem;

#[derive(Debug)]
pub struct SubworkflowRetries {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    counts: BTreeMap<PathBuf, u32>,
}

impl SubworkflowRetries {
    pub fn open(fs: Arc<dyn FileSystem>, path: &Path) -> SubworkflowRetries {
        let mut counts = BTreeMap::new();
        if fs.exists(path) {
            match fs.read_to_string(path) {
                Ok(text) => {
                    for line in text.lines() {
                        let parsed = line
                            .rsplit_once(' ')
                            .and_then(|(dir, n)| n.trim().parse::<u32>().ok().map(|n| (dir, n)));
                        match parsed {
                            Some((dir, n)) => {
                                counts.insert(PathBuf::from(dir), n);
                            }
                            None => warn!(line, "malformed sub-workflow retry line"),
                        }
                    }
                }
                Err(err) => warn!(path = %path.display(), error = %err, "cannot read sub-workflow retries"),
            }
        }
        SubworkflowRetries {
            fs,
            path: path.to_path_buf(),
            counts,
        }
    }

    pub fn record(&mut self, dir: &Path, retry: u32) -> Result<()> {
        if self.counts.insert(dir.to_path_buf(), retry) == Some(retry) {
            return Ok(());
        }
        let body: String = self
            .counts
            .iter()
            .map(|(d, n)| format!("{} {}\n", d.display(), n))
            .collect();
        self.fs.write(&self.path, body.as_bytes())
    }
}
