// crates/test-utils/src/run_dir.rs

//! On-disk workflow run directories for integration tests.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A written run directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub dir: PathBuf,
    pub wf_uuid: String,
    /// The engine progress log (not created by the builder).
    pub log: PathBuf,
}

impl RunDir {
    /// Append lines to the progress log, creating it if needed.
    pub fn append_log(&self, lines: &[String]) -> Result<()> {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .with_context(|| format!("opening {:?}", self.log))?;
        for line in lines {
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))
    }
}

#[derive(Debug, Clone)]
struct JobSpec {
    id: String,
    post_script: bool,
    child_log: Option<PathBuf>,
}

/// Writes `braindump.yml`, the DAG file and one submit file per job.
#[derive(Debug, Clone)]
pub struct RunDirBuilder {
    dir: PathBuf,
    wf_uuid: String,
    label: String,
    root_wf_uuid: Option<String>,
    jobs: Vec<JobSpec>,
    edges: Vec<(String, String)>,
}

impl RunDirBuilder {
    pub fn new(dir: impl Into<PathBuf>, wf_uuid: &str) -> Self {
        Self {
            dir: dir.into(),
            wf_uuid: wf_uuid.to_string(),
            label: "diamond".to_string(),
            root_wf_uuid: None,
            jobs: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn root(mut self, root_wf_uuid: &str) -> Self {
        self.root_wf_uuid = Some(root_wf_uuid.to_string());
        self
    }

    pub fn job(mut self, id: &str) -> Self {
        self.jobs.push(JobSpec {
            id: id.to_string(),
            post_script: false,
            child_log: None,
        });
        self
    }

    /// A job whose end is decided by a POST script.
    pub fn job_with_post(mut self, id: &str) -> Self {
        self.jobs.push(JobSpec {
            id: id.to_string(),
            post_script: true,
            child_log: None,
        });
        self
    }

    /// A job that plans and runs a nested workflow logging to `child_log`.
    pub fn subworkflow_job(mut self, id: &str, child_log: impl AsRef<Path>) -> Self {
        self.jobs.push(JobSpec {
            id: id.to_string(),
            post_script: false,
            child_log: Some(child_log.as_ref().to_path_buf()),
        });
        self
    }

    pub fn edge(mut self, parent: &str, child: &str) -> Self {
        self.edges.push((parent.to_string(), child.to_string()));
        self
    }

    pub fn build(self) -> Result<RunDir> {
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {:?}", self.dir))?;
        let dag_name = format!("{}-0.dag", self.label);

        let mut braindump = String::new();
        writeln!(braindump, "wf_uuid: {}", self.wf_uuid)?;
        if let Some(root) = &self.root_wf_uuid {
            writeln!(braindump, "root_wf_uuid: {root}")?;
        }
        writeln!(braindump, "dag: {dag_name}")?;
        writeln!(braindump, "dax_label: {}", self.label)?;
        writeln!(braindump, "dax_index: '0'")?;
        writeln!(braindump, "submit_dir: {}", self.dir.display())?;
        writeln!(braindump, "user: tester")?;
        fs::write(self.dir.join("braindump.yml"), braindump)?;

        let mut dag = String::new();
        for job in &self.jobs {
            writeln!(dag, "JOB {} {}.sub", job.id, job.id)?;
            if job.post_script {
                writeln!(dag, "SCRIPT POST {} /bin/exitpost -e {}.out", job.id, job.id)?;
            }
        }
        for (parent, child) in &self.edges {
            writeln!(dag, "PARENT {parent} CHILD {child}")?;
        }
        fs::write(self.dir.join(&dag_name), dag)?;

        for job in &self.jobs {
            let mut sub = String::new();
            writeln!(sub, "+pegasus_site = \"local\"")?;
            writeln!(sub, "output = {}.out", job.id)?;
            writeln!(sub, "error = {}.err", job.id)?;
            if let Some(child) = &job.child_log {
                writeln!(sub, "environment = \"_CONDOR_DAGMAN_LOG={}\"", child.display())?;
            }
            fs::write(self.dir.join(format!("{}.sub", job.id)), sub)?;
        }

        Ok(RunDir {
            log: self.dir.join(format!("{dag_name}.dagman.out")),
            dir: self.dir,
            wf_uuid: self.wf_uuid,
        })
    }
}
