// src/workflow/mod.rs

//! One tracked workflow run.
//!
//! [`Workflow`] owns the job table, the line counters and the recovery
//! files of a single run. It is synchronous and never talks to the event
//! sink or the notification trigger directly: every event and every due
//! notification is queued as a [`WorkflowEffect`] and drained by the
//! scheduler once the chunk of lines has been processed.

pub mod dag_file;
pub mod events;
pub mod jobstate_log;
pub mod manifest;
mod output;
pub mod rules;
pub mod subworkflow;
mod transitions;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, MonitorOptions};
use crate::fs::FileSystem;
use crate::grammar::{Classified, EngineLine, JobLine, JobTarget, LineClassifier};
use crate::job::{JobInstance, JobState};
use crate::recovery::{FileRecoveryStore, RecoveryPaths, RecoveryStore, WorkflowState};
use crate::sink::{Fields, StructuredEvent};
use crate::types::{DAGMAN_OUT_SUFFIX, EndReason, LifecycleState, Timestamp, UNKNOWN_FAILURE_CODE};

use self::dag_file::DagFile;
use self::events::EventBuilder;
use self::jobstate_log::{JOBSTATE_FILE, JobstateLog};
use self::manifest::{MANIFEST_FILE, Manifest};
use self::rules::{Notification, NotificationRules, NotifyContext};
use self::subworkflow::SubworkflowLink;

/// Engine version assumed until the log reports one (8.2.8).
pub const DAGMAN_VERSION_DEFAULT: u32 = 80208;
/// First engine version (8.3.3) that reports why a job was held.
pub const DAGMAN_VERSION_HELD_REASON: u32 = 80303;

const ABORT_REASON: &str = "DAGMan aborted as it received SIGUSR1 signal.";

type JobKey = (String, u32);

/// Work the scheduler carries out on behalf of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEffect {
    Event(StructuredEvent),
    Notify(Notification),
}

/// What a single log line did to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Ignored,
    StateEvent,
    /// A job launched a nested workflow whose log should be tracked too.
    FollowSubworkflow(SubworkflowLink),
}

/// Where a nested workflow hangs off its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub wf_uuid: String,
    pub root_wf_uuid: String,
    pub job: String,
    pub seq: u32,
}

impl From<&SubworkflowLink> for ParentLink {
    fn from(link: &SubworkflowLink) -> Self {
        Self {
            wf_uuid: link.parent_wf_uuid.clone(),
            root_wf_uuid: link.root_wf_uuid.clone(),
            job: link.parent_job.clone(),
            seq: link.parent_seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Start,
    End,
}

/// Everything needed to open a workflow.
#[derive(Debug)]
pub struct WorkflowSetup {
    /// The engine progress log to follow.
    pub log_path: PathBuf,
    pub parent: Option<ParentLink>,
    pub options: MonitorOptions,
    pub max_output_length: usize,
    pub now: Timestamp,
    /// Our own process id, recorded in the started marker.
    pub pid: u32,
    /// Replaces the recovery files next to the log.
    pub store: Option<Box<dyn RecoveryStore>>,
}

impl WorkflowSetup {
    pub fn new(log_path: PathBuf, config: &MonitorConfig, options: MonitorOptions, now: Timestamp) -> Self {
        Self {
            log_path,
            parent: None,
            options,
            max_output_length: config.output.max_output_length,
            now,
            pid: std::process::id(),
            store: None,
        }
    }
}

#[derive(Debug)]
pub struct Workflow {
    fs: Arc<dyn FileSystem>,
    store: Box<dyn RecoveryStore>,
    manifest: Manifest,
    builder: EventBuilder,
    dag: DagFile,
    jobstate: JobstateLog,
    rules: Option<NotificationRules>,
    classifier: LineClassifier,
    options: MonitorOptions,
    max_output_length: usize,

    wf_uuid: String,
    root_wf_uuid: String,
    parent: Option<ParentLink>,
    log_path: PathBuf,
    run_dir: PathBuf,
    original_submit_dir: Option<String>,
    submit_dir_text: String,
    display_id: String,

    lifecycle: LifecycleState,
    line: u64,
    last_processed_line: u64,
    previous_processed_line: u64,
    restart_count: i64,
    current_ts: Timestamp,
    started_at: Timestamp,
    last_engine_state: Option<EngineState>,
    current_state_reason: Option<String>,
    condor_id: Option<String>,
    dagman_pid: i32,
    dagman_version: u32,
    dagman_exit_code: Option<i32>,
    monitord_exit_code: i32,
    condor_log: Option<String>,

    jobs: BTreeMap<JobKey, JobInstance>,
    /// Current attempt of every job id.
    jobs_map: HashMap<String, u32>,
    job_counters: BTreeMap<String, u32>,
    job_submit_seq: u32,
    walltime: HashMap<String, i64>,
    job_site: HashMap<String, String>,
    last_submitted_job: Option<String>,
    last_known_job: Option<JobKey>,
    mapped_parents: BTreeSet<JobKey>,

    effects: Vec<WorkflowEffect>,
}

impl Workflow {
    /// Load the manifest and recovery files of the run owning `log_path`
    /// and queue the planning events of a first visit.
    pub fn open(fs: Arc<dyn FileSystem>, setup: WorkflowSetup) -> Result<Workflow> {
        let WorkflowSetup {
            log_path,
            parent,
            options,
            max_output_length,
            now,
            pid,
            store,
        } = setup;

        let run_dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let manifest_path = match (&parent, &options.manifest_override) {
            (None, Some(path)) => run_dir.join(path),
            _ => run_dir.join(MANIFEST_FILE),
        };
        let manifest = Manifest::load(fs.as_ref(), &manifest_path)
            .with_context(|| format!("cannot load workflow manifest {}", manifest_path.display()))?;

        let wf_uuid = manifest.wf_uuid.clone();
        let root_wf_uuid = parent
            .as_ref()
            .map(|p| p.root_wf_uuid.clone())
            .or_else(|| manifest.root_wf_uuid.clone())
            .unwrap_or_else(|| wf_uuid.clone());
        let builder = EventBuilder::new(&manifest, &root_wf_uuid, manifest.timestamp.unwrap_or(now));

        let store: Box<dyn RecoveryStore> = match store {
            Some(store) => store,
            None => {
                let paths = RecoveryPaths::new(&run_dir, options.output_dir.as_deref(), &wf_uuid);
                Box::new(FileRecoveryStore::new(Arc::clone(&fs), paths))
            }
        };

        let mut previous_processed_line = 0;
        let mut state = WorkflowState::default();
        if !options.replay {
            match store.read_progress()? {
                Some(line) if line > 0 => {
                    info!(wf_uuid = %wf_uuid, line, "previous run stopped early, reprocessing log from the start");
                    previous_processed_line = line;
                }
                _ => {
                    if let Some(saved) = store.read_state()? {
                        debug!(wf_uuid = %wf_uuid, line = saved.last_line, "resuming from saved state");
                        state = saved;
                    }
                }
            }
        }

        let jobstate_path = match &options.output_dir {
            Some(dir) => dir.join(format!("{wf_uuid}-{JOBSTATE_FILE}")),
            None => run_dir.join(JOBSTATE_FILE),
        };
        let rotate = options.replay || previous_processed_line != 0;
        let jobstate = JobstateLog::open(Arc::clone(&fs), jobstate_path, rotate)?;

        let rules = if options.notifications_enabled && !options.replay {
            manifest
                .notify
                .as_ref()
                .map(|file| NotificationRules::load(fs.as_ref(), &run_dir.join(file), &wf_uuid))
                .filter(|rules| !rules.is_empty())
        } else {
            None
        };
        if rules.is_none() {
            debug!(wf_uuid = %wf_uuid, "notifications disabled for this workflow");
        }

        let dag_path = run_dir.join(&manifest.dag);
        let dag = DagFile::load(fs.as_ref(), &dag_path, &run_dir).unwrap_or_else(|err| {
            warn!(path = %dag_path.display(), error = %err, "unable to read DAG file");
            DagFile::default()
        });

        let original_submit_dir = manifest
            .original_submit_dir
            .clone()
            .or_else(|| manifest.submit_dir.clone());
        let submit_dir_text = manifest
            .submit_dir
            .clone()
            .unwrap_or_else(|| run_dir.display().to_string());
        let display_id = manifest.display_id();

        let mut wf = Workflow {
            fs,
            store,
            builder,
            dag,
            jobstate,
            rules,
            classifier: LineClassifier::new(options.adjust_secs),
            max_output_length,
            wf_uuid,
            root_wf_uuid,
            parent,
            log_path,
            run_dir,
            original_submit_dir,
            submit_dir_text,
            display_id,
            lifecycle: LifecycleState::Unstarted,
            line: 0,
            last_processed_line: state.last_line,
            previous_processed_line,
            restart_count: state.restart_count,
            current_ts: now,
            started_at: now,
            last_engine_state: None,
            current_state_reason: None,
            condor_id: None,
            dagman_pid: 0,
            dagman_version: DAGMAN_VERSION_DEFAULT,
            dagman_exit_code: None,
            monitord_exit_code: 0,
            condor_log: None,
            jobs: BTreeMap::new(),
            jobs_map: HashMap::new(),
            job_counters: state.job_counters,
            job_submit_seq: state.job_sequence.max(1),
            walltime: HashMap::new(),
            job_site: HashMap::new(),
            last_submitted_job: None,
            last_known_job: None,
            mapped_parents: BTreeSet::new(),
            effects: Vec::new(),
            manifest,
            options,
        };

        wf.jobstate.internal(now, "MONITORD_STARTED");
        if let Err(err) = wf.store.mark_started(pid, now) {
            warn!(wf_uuid = %wf.wf_uuid, error = %err, "cannot write started marker");
        }

        if wf.last_processed_line == 0 {
            wf.send_plan(now);
        }
        if let Some(parent) = wf.parent.clone() {
            wf.map_subwf(&parent.job, parent.seq);
        }

        info!(
            wf_uuid = %wf.wf_uuid,
            log = %wf.log_path.display(),
            resume_line = wf.last_processed_line,
            "tracking workflow"
        );
        Ok(wf)
    }

    fn send_plan(&mut self, ts: Timestamp) {
        let parent = self.parent.as_ref().map(|p| p.wf_uuid.clone());
        let plan = events::wf_plan(&self.manifest, ts, parent.as_deref(), &self.root_wf_uuid);
        self.emit("wf.plan", plan);

        let mut planned = Vec::new();
        for (job_id, info) in &self.dag.jobs {
            planned.push(events::job_info(&self.wf_uuid, job_id, info, self.dag.is_pmc, ts));
        }
        for fields in planned {
            self.emit("job.info", fields);
        }

        if let Some(edges) = self.dag.ordered_edges() {
            for (parent, child) in edges {
                let fields = events::job_edge(&self.wf_uuid, &parent, &child, ts);
                self.emit("job.edge", fields);
            }
        }
    }

    /// Record the parent job this run was launched by, once per attempt.
    pub fn map_subwf(&mut self, parent_job: &str, parent_seq: u32) {
        let Some(parent) = self.parent.as_ref() else {
            return;
        };
        if !self.mapped_parents.insert((parent_job.to_string(), parent_seq)) {
            return;
        }
        let fields = events::subwf_map(&parent.wf_uuid, self.current_ts, &self.wf_uuid, parent_job, parent_seq);
        if self.options.events_enabled {
            let event = self.builder.build_bare("xwf.map.subwf_job", fields);
            self.effects.push(WorkflowEffect::Event(event));
        }
    }

    /// Where the nested workflow launched by `job_id` logs, if it has one.
    fn discover_subworkflow(&self, job_id: &str) -> Option<SubworkflowLink> {
        let info = self.dag.job(job_id)?;
        let job = self.job(job_id)?;

        let link = |log: PathBuf, retry_dir: PathBuf, retry: u32| SubworkflowLink {
            log,
            parent_wf_uuid: self.wf_uuid.clone(),
            root_wf_uuid: self.root_wf_uuid.clone(),
            parent_job: job_id.to_string(),
            parent_seq: job.submit_seq,
            retry_dir,
            retry,
        };

        if info.is_subdag {
            let dag = info.subdag_dag.as_deref()?;
            let mut log = self.run_dir.join(dag).into_os_string();
            log.push(DAGMAN_OUT_SUFFIX);
            let log = PathBuf::from(log);
            let dir = log.parent().map(Path::to_path_buf).unwrap_or_default();
            debug!(job = job_id, log = %log.display(), "following nested DAG");
            return Some(link(log, dir, 0));
        }

        let Some(announced) = job.submit.child_log.as_deref() else {
            if job_id.starts_with("subdax_") {
                tracing::error!(job = job_id, "nested workflow job does not name its log");
            }
            return None;
        };
        let retry = self.job_counters.get(job_id).copied().unwrap_or(0);
        let (log, dir) = subworkflow::resolve_log(
            self.fs.as_ref(),
            announced,
            &self.run_dir,
            self.original_submit_dir.as_deref(),
            retry,
        )?;
        debug!(job = job_id, log = %log.display(), retry, "following nested workflow");
        Some(link(log, dir, retry))
    }

    /// Feed one raw log line.
    pub fn process_line(&mut self, raw: &str) -> LineOutcome {
        self.line += 1;
        if self.line <= self.last_processed_line {
            return LineOutcome::Ignored;
        }

        match self.classifier.classify(raw) {
            Classified::Ignored => LineOutcome::Ignored,
            Classified::Job { ts, events } => {
                self.current_ts = ts;
                let mut follow = None;
                for event in events {
                    if let Some(link) = self.job_line(event) {
                        follow.get_or_insert(link);
                    }
                }
                match follow {
                    Some(link) => LineOutcome::FollowSubworkflow(link),
                    None => LineOutcome::StateEvent,
                }
            }
            Classified::Engine { ts, event } => {
                self.current_ts = ts;
                self.engine_line(event);
                LineOutcome::StateEvent
            }
        }
    }

    fn job_line(&mut self, event: JobLine) -> Option<SubworkflowLink> {
        let JobLine {
            state,
            target,
            sched_id,
            status,
            reason,
        } = event;

        let (job_id, sched_id) = match target {
            JobTarget::Named(job) => (job, sched_id),
            JobTarget::LastSubmitted => match self.last_submitted_job.clone() {
                Some(job) => (job, sched_id),
                None => {
                    warn!(wf_uuid = %self.wf_uuid, line = self.line, state = %state, "no submitted job to attach event to");
                    return None;
                }
            },
            JobTarget::LastKnown => {
                let Some(job) = self.last_known_job.as_ref().and_then(|key| self.jobs.get(key)) else {
                    warn!(wf_uuid = %self.wf_uuid, line = self.line, "hold reason without a known job, skipping");
                    return None;
                };
                if job.state != Some(JobState::JobHeld) {
                    tracing::error!(job = %job.job_id, reason = ?reason, "last known job is not held");
                }
                (job.job_id.clone(), job.sched_id.clone())
            }
        };

        let is_submit = state == JobState::Submit;
        self.add(&job_id, state, sched_id, status, reason)?;

        if is_submit && self.options.follow_subworkflows {
            return self.discover_subworkflow(&job_id);
        }
        None
    }

    fn engine_line(&mut self, event: EngineLine) {
        match event {
            EngineLine::StartingUp { condor_id } => {
                self.condor_id = Some(condor_id);
                if !self.options.keep_state {
                    self.start_wf();
                }
            }
            EngineLine::Exiting { exit_code } => {
                self.dagman_exit_code = Some(exit_code);
                self.change_wf_state(EngineState::End);
            }
            EngineLine::Pid(pid) => {
                if !self.options.replay {
                    debug!(wf_uuid = %self.wf_uuid, pid, "engine pid");
                    self.dagman_pid = pid;
                }
            }
            EngineLine::ParsingDag { .. } => self.change_wf_state(EngineState::Start),
            EngineLine::Version { version, numeric } => {
                debug!(wf_uuid = %self.wf_uuid, version = %version, "engine version");
                self.dagman_version = numeric;
            }
            EngineLine::CommonLog(path) => self.condor_log = Some(path),
            EngineLine::AbortSignal => {
                warn!(run_dir = %self.run_dir.display(), "engine was aborted");
                self.current_state_reason = Some(ABORT_REASON.to_string());
            }
        }
    }

    fn change_wf_state(&mut self, state: EngineState) {
        let ts = self.current_ts;

        if state == EngineState::Start && self.last_engine_state == Some(EngineState::Start) {
            let end_ts = ts - 1;
            warn!(
                condor_id = ?self.condor_id,
                run_dir = %self.run_dir.display(),
                ts = end_ts,
                "consecutive workflow start events, inserting workflow end"
            );
            self.jobstate
                .internal(end_ts, &format!("DAGMAN_FINISHED {UNKNOWN_FAILURE_CODE}"));
            let fields = events::wf_state(&self.wf_uuid, end_ts, None, self.restart_count, Some(UNKNOWN_FAILURE_CODE));
            self.emit("xwf.end", fields);
            self.dagman_exit_code = None;
        }

        match state {
            EngineState::Start => {
                info!(wf_uuid = %self.wf_uuid, condor_id = ?self.condor_id, "engine starting");
                let id = self.condor_id.as_deref().unwrap_or("None");
                self.jobstate.internal(ts, &format!("DAGMAN_STARTED {id}"));
                self.restart_count += 1;
                self.lifecycle = LifecycleState::Running;
            }
            EngineState::End => {
                let code = self.dagman_exit_code.map_or_else(|| "None".to_string(), |c| c.to_string());
                self.jobstate.internal(ts, &format!("DAGMAN_FINISHED {code}"));
            }
        }

        if let Some(rules) = self.notifications_due() {
            let ctx = self.notify_context();
            let exit_code = match state {
                EngineState::Start => None,
                EngineState::End => Some(self.dagman_exit_code.unwrap_or(0)),
            };
            let out_file = self.log_path.display().to_string();
            let due = rules.for_workflow(&ctx, &self.wf_uuid, &out_file, exit_code);
            self.push_notifications(due);
        }

        let reason = self.current_state_reason.take();
        match state {
            EngineState::Start => {
                let fields = events::wf_state(&self.wf_uuid, ts, reason.as_deref(), self.restart_count, None);
                self.emit("xwf.start", fields);
            }
            EngineState::End => {
                let mut fields = events::wf_state(
                    &self.wf_uuid,
                    ts,
                    reason.as_deref(),
                    self.restart_count,
                    Some(self.dagman_exit_code.unwrap_or(0)),
                );
                if self.dagman_exit_code.is_none() {
                    warn!(wf_uuid = %self.wf_uuid, wf = %self.display_id, line = self.line, "engine exit code hasn't been set");
                    fields.insert("level".into(), "Error".into());
                }
                self.emit("xwf.end", fields);
            }
        }
        self.last_engine_state = Some(state);
    }

    /// The engine restarted: forget attempts that already completed.
    fn start_wf(&mut self) {
        debug!(wf_uuid = %self.wf_uuid, "engine restarted, cleaning up old job information");
        let done: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|((job_id, _), job)| match job.state {
                Some(JobState::PostScriptSuccess) => true,
                Some(JobState::JobSuccess) => !self.dag.has_postscript(job_id),
                _ => false,
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in done {
            debug!(job = %key.0, seq = key.1, "removing completed job");
            self.jobs.remove(&key);
            if self.jobs_map.get(&key.0) == Some(&key.1) {
                self.jobs_map.remove(&key.0);
            }
            self.walltime.remove(&key.0);
            self.job_site.remove(&key.0);
        }
    }

    /// End the run: record why, persist the counters and mark it done.
    /// Later calls do nothing.
    pub fn finish(&mut self, reason: EndReason, now: Timestamp) {
        if self.lifecycle == LifecycleState::Ended {
            return;
        }
        self.monitord_exit_code = reason.exit_code();

        let abnormal = matches!(
            reason,
            EndReason::NeverAppeared | EndReason::Truncated | EndReason::Stale | EndReason::LostContact
        );
        if abnormal {
            self.current_ts = self.current_ts.max(now);
            match self.last_engine_state {
                Some(EngineState::Start) => {
                    warn!(wf_uuid = %self.wf_uuid, reason = reason.describe(), "ending workflow that is still running");
                    self.dagman_exit_code = Some(reason.exit_code());
                    self.current_state_reason = Some(reason.describe().to_string());
                    self.change_wf_state(EngineState::End);
                }
                // The engine's own end is already on record.
                Some(EngineState::End) => {}
                None => {
                    warn!(wf_uuid = %self.wf_uuid, reason = reason.describe(), "ending workflow the engine never started");
                    let fields = events::wf_state(
                        &self.wf_uuid,
                        self.current_ts,
                        Some(reason.describe()),
                        self.restart_count,
                        Some(reason.exit_code()),
                    );
                    self.emit("xwf.end", fields);
                }
            }
        }
        self.end_workflow(now);
    }

    fn end_workflow(&mut self, now: Timestamp) {
        self.jobstate
            .internal(now, &format!("MONITORD_FINISHED {}", self.monitord_exit_code));

        let state = WorkflowState {
            job_sequence: self.job_submit_seq,
            last_line: self.line.max(self.last_processed_line),
            restart_count: self.restart_count,
            job_counters: self.job_counters.clone(),
        };
        if let Err(err) = self.store.write_state(&state) {
            warn!(wf_uuid = %self.wf_uuid, error = %err, "cannot write workflow state");
        }
        if let Err(err) = self.store.clear_progress() {
            warn!(wf_uuid = %self.wf_uuid, error = %err, "unable to remove recover file");
        }
        let duration = (now - self.started_at) as f64;
        if let Err(err) = self.store.mark_done(now, duration) {
            warn!(wf_uuid = %self.wf_uuid, error = %err, "cannot write done marker");
        }

        self.lifecycle = LifecycleState::Ended;
        info!(wf_uuid = %self.wf_uuid, exit_code = self.monitord_exit_code, "finished tracking workflow");
    }

    /// Persist how far the log has been processed. Called after the events
    /// of the processed lines were flushed.
    pub fn checkpoint(&mut self) {
        if self.lifecycle == LifecycleState::Ended || self.line < self.previous_processed_line {
            return;
        }
        if let Err(err) = self.store.write_progress(self.line) {
            warn!(wf_uuid = %self.wf_uuid, error = %err, "cannot write recover file");
        }
    }

    /// Take the queued events and notifications.
    pub fn drain_effects(&mut self) -> Vec<WorkflowEffect> {
        std::mem::take(&mut self.effects)
    }

    fn emit(&mut self, kind: &str, fields: Fields) {
        if !self.options.events_enabled {
            return;
        }
        let event = self.builder.build(kind, fields);
        self.effects.push(WorkflowEffect::Event(event));
    }

    fn emit_job(&mut self, kind: &str, fields: Fields) {
        self.emit(&format!("job_inst.{kind}"), fields);
    }

    /// Rules to evaluate, unless notifications are off or the line was
    /// already handled by an earlier run.
    fn notifications_due(&self) -> Option<&NotificationRules> {
        if self.line < self.previous_processed_line {
            debug!(line = self.line, "recovery mode: skipping notification already issued");
            return None;
        }
        self.rules.as_ref()
    }

    fn notify_context(&self) -> NotifyContext<'_> {
        NotifyContext {
            ts: self.current_ts,
            submit_dir: &self.submit_dir_text,
            wf_id: &self.display_id,
        }
    }

    fn push_notifications(&mut self, due: Vec<Notification>) {
        self.effects.extend(due.into_iter().map(WorkflowEffect::Notify));
    }

    pub fn wf_uuid(&self) -> &str {
        &self.wf_uuid
    }

    pub fn root_wf_uuid(&self) -> &str {
        &self.root_wf_uuid
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn is_ended(&self) -> bool {
        self.lifecycle == LifecycleState::Ended
    }

    /// Lines read so far, including skipped ones.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Whether this run restarts its output from the first line.
    pub fn starts_from_scratch(&self) -> bool {
        self.last_processed_line == 0
    }

    /// Engine process id, 0 until reported.
    pub fn dagman_pid(&self) -> i32 {
        self.dagman_pid
    }

    /// The last engine line seen was its exit, with a status.
    pub fn engine_exited(&self) -> bool {
        self.last_engine_state == Some(EngineState::End) && self.dagman_exit_code.is_some()
    }

    pub fn dagman_exit_code(&self) -> Option<i32> {
        self.dagman_exit_code
    }

    pub fn monitord_exit_code(&self) -> i32 {
        self.monitord_exit_code
    }

    pub fn restart_count(&self) -> i64 {
        self.restart_count
    }

    pub fn condor_log(&self) -> Option<&str> {
        self.condor_log.as_deref()
    }

    /// Current attempt of `job_id`.
    pub fn job(&self, job_id: &str) -> Option<&JobInstance> {
        let seq = *self.jobs_map.get(job_id)?;
        self.jobs.get(&(job_id.to_string(), seq))
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.options.output_dir.as_deref()
    }
}
