// src/workflow/dag_file.rs

//! The engine's DAG description: where each job's submit file lives, its
//! PRE/POST scripts, nested DAGs and the dependency edges.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

use crate::fs::FileSystem;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("valid dag pattern")
}

static JOB: LazyLock<Regex> = LazyLock::new(|| ci(r"JOB\s+(\S+)\s(\S+)(\s+DONE)?"));
static TASK: LazyLock<Regex> = LazyLock::new(|| ci(r"TASK\s+(\S*)\s(\S+)"));
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| ci(r"SCRIPT (?:PRE|POST)\s+(\S+)\s(\S+)\s(.*)"));
static SUBDAG: LazyLock<Regex> = LazyLock::new(|| ci(r"SUBDAG EXTERNAL\s+(\S+)\s(\S+)\s?(?:DIR)?\s?(\S+)?"));
static PLANNER_LOG: LazyLock<Regex> = LazyLock::new(|| ci(r"\s*-Dpegasus.log.\*=(\S+)\s.*"));

/// What the DAG file says about one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub sub_file: Option<PathBuf>,
    pub pre_exec: Option<String>,
    pub pre_args: Option<String>,
    pub post_exec: Option<String>,
    pub post_args: Option<String>,
    pub is_subdag: bool,
    pub subdag_dag: Option<String>,
    pub subdag_dir: Option<String>,
    /// Log a planning PRE script writes, from its `-Dpegasus.log.*=` argument.
    pub planner_log: Option<String>,
}

impl JobInfo {
    pub fn has_postscript(&self) -> bool {
        self.post_exec.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DagFile {
    /// Jobs not yet marked DONE, plus every job with scripts or a nested DAG.
    pub jobs: BTreeMap<String, JobInfo>,
    /// `(parent, child)` dependency pairs in file order.
    pub edges: Vec<(String, String)>,
    /// Task-clustered DAG: output files are always rotated.
    pub is_pmc: bool,
}

impl DagFile {
    pub fn load(fs: &dyn FileSystem, path: &Path, run_dir: &Path) -> Result<DagFile> {
        let text = fs.read_to_string(path)?;
        info!(path = %path.display(), "parsing DAG file");
        Ok(Self::parse(&text, run_dir))
    }

    pub fn parse(text: &str, run_dir: &Path) -> DagFile {
        let mut dag = DagFile::default();

        for line in text.lines() {
            let lower = line.trim_start().to_lowercase();
            if lower.starts_with("job") {
                let Some(caps) = JOB.captures(line) else { continue };
                if caps.get(3).is_some() {
                    continue;
                }
                dag.entry(&caps[1]).sub_file = Some(run_dir.join(&caps[2]));
            } else if lower.starts_with("task") {
                let Some(caps) = TASK.captures(line) else { continue };
                dag.entry(&caps[1]).sub_file = None;
                dag.is_pmc = true;
            } else if lower.starts_with("script post") {
                let Some(caps) = SCRIPT.captures(line) else { continue };
                let info = dag.entry(&caps[1]);
                info.post_exec = Some(caps[2].to_string());
                info.post_args = Some(caps[3].to_string());
            } else if lower.starts_with("script pre") {
                let Some(caps) = SCRIPT.captures(line) else { continue };
                let planner_log = PLANNER_LOG.captures(&caps[3]).map(|c| c[1].to_string());
                let info = dag.entry(&caps[1]);
                info.pre_exec = Some(caps[2].to_string());
                info.pre_args = Some(caps[3].to_string());
                info.planner_log = planner_log;
            } else if lower.starts_with("subdag external") {
                let Some(caps) = SUBDAG.captures(line) else { continue };
                let dag_path = caps[2].to_string();
                let dir = caps.get(3).map(|m| m.as_str().to_string()).or_else(|| {
                    Path::new(&dag_path)
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                });
                let info = dag.entry(&caps[1]);
                info.is_subdag = true;
                info.subdag_dag = Some(dag_path);
                info.subdag_dir = dir;
            } else if lower.starts_with("parent") {
                dag.edges.extend(parse_dependency(line));
            }
        }

        dag
    }

    fn entry(&mut self, job: &str) -> &mut JobInfo {
        self.jobs.entry(job.to_string()).or_default()
    }

    pub fn job(&self, job: &str) -> Option<&JobInfo> {
        self.jobs.get(job)
    }

    pub fn has_postscript(&self, job: &str) -> bool {
        self.jobs.get(job).is_some_and(JobInfo::has_postscript)
    }

    pub fn is_subdag(&self, job: &str) -> bool {
        self.jobs.get(job).is_some_and(|j| j.is_subdag)
    }

    /// Dependency edges ordered so every parent's edges come before its
    /// children's. `None` when the edges contain a cycle.
    pub fn ordered_edges(&self) -> Option<Vec<(String, String)>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (parent, child) in &self.edges {
            graph.add_edge(parent.as_str(), child.as_str(), ());
        }

        match toposort(&graph, None) {
            Ok(order) => {
                let rank: BTreeMap<&str, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
                let mut edges = self.edges.clone();
                edges.sort_by_key(|(p, c)| (rank[p.as_str()], rank[c.as_str()]));
                edges.dedup();
                Some(edges)
            }
            Err(cycle) => {
                warn!(job = cycle.node_id(), "dependency cycle in DAG file, skipping edges");
                None
            }
        }
    }
}

/// `PARENT a b CHILD c d` expands to every parent/child pair.
fn parse_dependency(line: &str) -> Vec<(String, String)> {
    let mut parents = Vec::new();
    let mut children = Vec::new();
    let mut in_children = false;

    for word in line.split_whitespace().skip(1) {
        if word.eq_ignore_ascii_case("child") {
            in_children = true;
        } else if in_children {
            children.push(word.to_string());
        } else {
            parents.push(word.to_string());
        }
    }

    parents
        .iter()
        .flat_map(|p| children.iter().map(move |c| (p.clone(), c.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAG: &str = "\
JOB create_dir_1 create_dir_1.sub
JOB preprocess_ID1 00/00/preprocess_ID1.sub
JOB finished_ID0 finished_ID0.sub DONE
SCRIPT POST preprocess_ID1 /bin/pegasus-exitcode preprocess_ID1.out
SCRIPT PRE subdax_inner_ID2 /bin/pegasus-plan -Dpegasus.log.*=/run/inner.pre.log --dax inner.dax
SUBDAG EXTERNAL subdag_ID3 /run/nested/nested.dag DIR /run/nested
PARENT create_dir_1 CHILD preprocess_ID1 subdag_ID3
PARENT preprocess_ID1 CHILD subdag_ID3
";

    #[test]
    fn collects_job_metadata() {
        let dag = DagFile::parse(DAG, Path::new("/run"));
        assert!(dag.job("finished_ID0").is_none());
        let pre = dag.job("preprocess_ID1").unwrap();
        assert_eq!(pre.sub_file.as_deref(), Some(Path::new("/run/00/00/preprocess_ID1.sub")));
        assert!(pre.has_postscript());
        assert_eq!(dag.job("subdax_inner_ID2").unwrap().planner_log.as_deref(), Some("/run/inner.pre.log"));
        let sub = dag.job("subdag_ID3").unwrap();
        assert!(sub.is_subdag);
        assert_eq!(sub.subdag_dir.as_deref(), Some("/run/nested"));
        assert!(!dag.is_pmc);
    }

    #[test]
    fn edges_follow_topological_order() {
        let dag = DagFile::parse(DAG, Path::new("/run"));
        let edges = dag.ordered_edges().unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].0, "create_dir_1");
        assert_eq!(edges[2], ("preprocess_ID1".to_string(), "subdag_ID3".to_string()));
    }

    #[test]
    fn cycle_drops_edges() {
        let dag = DagFile::parse("PARENT a CHILD b\nPARENT b CHILD a\n", Path::new("/run"));
        assert!(dag.ordered_edges().is_none());
    }

    #[test]
    fn task_lines_mark_clustered_dag() {
        let dag = DagFile::parse("TASK t1 /bin/true\n", Path::new("/run"));
        assert!(dag.is_pmc);
        assert_eq!(dag.job("t1").unwrap().sub_file, None);
    }
}
