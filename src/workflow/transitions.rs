// src/workflow/transitions.rs

//! Job attempts and their state changes.

use std::path::Path;

use tracing::{debug, error, warn};

use super::events::{self, OutputPolicy, Script};
use super::manifest::normalize;
use super::{DAGMAN_VERSION_HELD_REASON, JobKey, Workflow};
use crate::job::submit_file::read_submit_file;
use crate::job::{JobInstance, JobState};

const SUBDAG_SITE: &str = "local";

fn submit_prefix(state: &JobState) -> &'static str {
    match state {
        JobState::GridSubmit | JobState::GridSubmitFailed => "grid.",
        JobState::GlobusSubmit | JobState::GlobusSubmitFailed => "globus.",
        _ => "",
    }
}

impl Workflow {
    /// Apply one job state line. Returns the attempt it landed on.
    pub(super) fn add(
        &mut self,
        job_id: &str,
        state: JobState,
        sched_id: Option<String>,
        status: Option<i32>,
        reason: Option<String>,
    ) -> Option<u32> {
        let walltime = if state.is_unsubmitted() {
            None
        } else {
            self.walltime.get(job_id).copied()
        };

        let seq = match state {
            JobState::PreScriptStarted => {
                let seq = self.add_job(job_id, &state, None);
                self.parse_submit_file(job_id, seq);
                self.remember_site(job_id, seq);
                seq
            }
            JobState::DagmanSubmit => {
                self.last_submitted_job = Some(job_id.to_string());
                let seq = self.add_job(job_id, &state, None);
                if let Some(minutes) = self.parse_submit_file(job_id, seq) {
                    self.walltime.insert(job_id.to_string(), minutes * 60);
                }
                self.remember_site(job_id, seq);
                return Some(seq);
            }
            JobState::Submit | JobState::SubmitFailed => self.add_job(job_id, &state, sched_id.as_deref()),
            _ => match self.jobs_map.get(job_id) {
                Some(seq) => *seq,
                None => {
                    warn!(job = job_id, state = %state, line = self.line, "state change for unknown job, skipping");
                    return None;
                }
            },
        };

        self.update_job_state(job_id, sched_id.as_deref(), seq, state, status, walltime, reason.as_deref());
        Some(seq)
    }

    /// Find or create the attempt a submission belongs to.
    fn add_job(&mut self, job_id: &str, state: &JobState, sched_id: Option<&str>) -> u32 {
        let reused = self.jobs_map.get(job_id).copied().filter(|seq| {
            self.jobs.get(&(job_id.to_string(), *seq)).is_some_and(|job| {
                job.state.as_ref().is_some_and(JobState::accepts_resubmission)
                    || (sched_id.is_some() && job.sched_id.as_deref() == sched_id)
            })
        });

        let seq = match reused {
            Some(seq) => seq,
            None => {
                let seq = self.job_submit_seq;
                let mut job = JobInstance::new(&self.wf_uuid, job_id, self.job_submit_dir(job_id), seq);
                job.site = self.job_site.get(job_id).cloned();
                self.jobs.insert((job_id.to_string(), seq), job);
                self.jobs_map.insert(job_id.to_string(), seq);
                self.job_submit_seq += 1;
                seq
            }
        };

        let counter = (*state == JobState::Submit).then(|| self.increment_job_counter(job_id));
        let ts = self.current_ts;
        if let Some(job) = self.jobs.get_mut(&(job_id.to_string(), seq)) {
            if let Some(id) = sched_id {
                job.sched_id = Some(id.to_string());
            }
            job.state = Some(state.clone());
            job.state_ts = Some(ts);
            if let Some(counter) = counter {
                job.output_counter = counter;
            }
        }
        seq
    }

    /// Directory holding the job's submit, `.out` and `.err` files.
    fn job_submit_dir(&self, job_id: &str) -> std::path::PathBuf {
        let Some(info) = self.dag.job(job_id) else {
            error!(job = job_id, run_dir = %self.run_dir.display(), "job not in DAG file, using run directory as submit directory");
            return self.run_dir.clone();
        };
        match info.sub_file.as_deref().and_then(Path::parent) {
            Some(dir) => dir.to_path_buf(),
            None => {
                if !self.dag.is_pmc && !info.is_subdag {
                    error!(job = job_id, "submit file path not specified for job");
                }
                self.run_dir.clone()
            }
        }
    }

    /// First call for a job yields 0.
    pub(super) fn increment_job_counter(&mut self, job_id: &str) -> u32 {
        *self
            .job_counters
            .entry(job_id.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(0)
    }

    fn remember_site(&mut self, job_id: &str, seq: u32) {
        if let Some(site) = self.jobs.get(&(job_id.to_string(), seq)).and_then(|j| j.site.clone()) {
            self.job_site.insert(job_id.to_string(), site);
        }
    }

    /// Read the planning metadata of a job into its attempt. Returns the
    /// requested walltime in minutes.
    fn parse_submit_file(&mut self, job_id: &str, seq: u32) -> Option<i64> {
        let key = (job_id.to_string(), seq);
        let info = self.dag.job(job_id);
        let is_subdag = info.is_some_and(|i| i.is_subdag);

        let Some(sub_file) = info.and_then(|i| i.sub_file.clone()) else {
            if let Some(job) = self.jobs.get_mut(&key) {
                if is_subdag {
                    job.site = Some(SUBDAG_SITE.to_string());
                } else {
                    job.submit.input_file = None;
                    job.submit.output_file = Some(format!("{job_id}.out"));
                    job.submit.error_file = Some(format!("{job_id}.err"));
                }
            }
            return None;
        };

        let mut submit = match read_submit_file(self.fs.as_ref(), &sub_file, job_id) {
            Ok(submit) => submit,
            Err(err) => {
                error!(job = job_id, path = %sub_file.display(), error = %err, "error processing submit file");
                return None;
            }
        };

        if let Some(orig) = self.original_submit_dir.as_deref() {
            let prefix = format!("{}/", orig.trim_end_matches('/'));
            for file in [&mut submit.input_file, &mut submit.output_file, &mut submit.error_file] {
                if let Some(name) = file.as_mut() {
                    let normalized = normalize(name);
                    if let Some(rest) = normalized.strip_prefix(&prefix) {
                        *name = rest.to_string();
                    }
                }
            }
        }

        let walltime = submit.walltime_minutes;
        if let Some(job) = self.jobs.get_mut(&key) {
            job.apply_submit_info(submit);
        }
        walltime
    }

    #[allow(clippy::too_many_arguments)]
    fn update_job_state(
        &mut self,
        job_id: &str,
        sched_id: Option<&str>,
        seq: u32,
        state: JobState,
        status: Option<i32>,
        walltime: Option<i64>,
        reason: Option<&str>,
    ) {
        let key: JobKey = (job_id.to_string(), seq);
        let ts = self.current_ts;
        let Some(job) = self.jobs.get_mut(&key) else {
            warn!(job = job_id, seq, "cannot find job");
            return;
        };
        self.last_known_job = Some(key.clone());

        let out_of_order = job.sched_id.is_none() && sched_id.is_some();
        let previous = job.state.clone();
        job.set_state(state.clone(), sched_id, ts, status);

        let detail = status.map(|s| s.to_string()).or_else(|| job.sched_id.clone());
        let site = if state.is_unsubmitted() { None } else { job.site.clone() };
        self.jobstate
            .job_line(ts, job_id, state.as_str(), detail.as_deref(), site.as_deref(), walltime, Some(seq));

        if !self.options.events_enabled && self.rules.is_none() {
            return;
        }

        let held_state = if self.dagman_version >= DAGMAN_VERSION_HELD_REASON {
            JobState::JobHeldReason
        } else {
            JobState::JobHeld
        };
        let has_postscript = self.dag.has_postscript(job_id);
        let parse_on_end = !has_postscript || self.dag.is_pmc;

        let mut app_exitcode = None;
        if matches!(state, JobState::JobSuccess | JobState::JobFailure) && parse_on_end {
            app_exitcode = self.parse_job_output(&key);
        }

        if out_of_order {
            self.emit_brief(&key, "submit.start", None, None);
        }

        match state {
            JobState::PreScriptSuccess | JobState::PreScriptFailure => self.emit_script(&key, Script::Pre),
            JobState::PostScriptSuccess | JobState::PostScriptFailure => {
                if let Some(job) = self.jobs.get_mut(&key) {
                    if job.main_exitcode.is_none() {
                        warn!(job = job_id, code = ?job.post_exitcode, "main job exit code unknown, using post script exit code");
                        job.main_exitcode = job.post_exitcode;
                    }
                }
                app_exitcode = self.parse_job_output(&key);
                self.flush_deferred_end(&key);
                self.emit_script(&key, Script::Post);
            }
            _ => {}
        }

        self.job_notifications(&key, &state, has_postscript, app_exitcode.or(status));

        match state {
            JobState::PreScriptStarted => self.emit_brief(&key, "pre.start", None, None),
            JobState::PreScriptTerminated => self.emit_brief(&key, "pre.term", None, None),
            JobState::PreScriptSuccess => self.emit_brief(&key, "pre.end", Some(0), None),
            JobState::PreScriptFailure => {
                let counter = self.increment_job_counter(job_id);
                let planner_log = self.dag.job(job_id).and_then(|i| i.planner_log.clone());
                let max_len = self.max_output_length;
                if let Some(job) = self.jobs.get_mut(&key) {
                    job.main_exitcode = job.pre_exitcode;
                    job.output_counter = counter;
                    if let Some(log) = planner_log {
                        let path = self.run_dir.join(format!("{log}.{counter:03}"));
                        job.read_output_file(self.fs.as_ref(), Some(&path), max_len);
                    }
                }
                self.emit_brief(&key, "pre.end", Some(-1), None);
                self.send_job_end(&key, -1, true);
            }
            JobState::Submit | JobState::GridSubmit | JobState::GlobusSubmit => {
                let prefix = submit_prefix(&state);
                self.emit_brief(&key, &format!("{prefix}submit.start"), None, None);
                self.emit_brief(&key, &format!("{prefix}submit.end"), Some(0), None);
            }
            ref failed if failed.is_submit_failure() => {
                let prefix = submit_prefix(failed);
                if let Some(job) = self.jobs.get_mut(&key) {
                    job.main_exitcode = Some(1);
                }
                self.emit_brief(&key, &format!("{prefix}submit.start"), None, None);
                self.emit_brief(&key, &format!("{prefix}submit.end"), Some(-1), None);
            }
            JobState::Execute => {
                if let Some(job) = self.jobs.get(&key) {
                    let fields = events::main_start(job);
                    self.emit_job("main.start", fields);
                }
            }
            JobState::RemoteError => self.emit_brief(&key, "remote_error", None, None),
            JobState::ImageSize => self.emit_brief(&key, "image.info", None, None),
            JobState::JobTerminated => self.emit_brief(&key, "main.term", Some(0), None),
            JobState::JobSuccess => self.send_job_end(&key, 0, parse_on_end),
            JobState::JobFailure => self.send_job_end(&key, -1, parse_on_end),
            JobState::JobAborted => {
                if let Some(job) = self.jobs.get_mut(&key) {
                    job.main_exitcode = Some(1);
                }
                self.emit_brief(&key, "abort.info", None, None);
                let was_held = previous.as_ref().is_some_and(JobState::is_held);
                self.send_job_end(&key, -1, if was_held { parse_on_end } else { true });
            }
            ref held if *held == held_state => self.emit_brief(&key, "held.start", None, reason),
            JobState::JobEvicted => self.emit_brief(&key, "main.term", Some(-1), None),
            JobState::JobReleased => self.emit_brief(&key, "held.end", Some(0), None),
            JobState::PostScriptStarted => self.emit_brief(&key, "post.start", None, None),
            JobState::PostScriptTerminated => self.emit_brief(&key, "post.term", None, None),
            JobState::PostScriptSuccess => self.emit_brief(&key, "post.end", Some(0), None),
            JobState::PostScriptFailure => self.emit_brief(&key, "post.end", Some(-1), None),
            _ => {}
        }

        if state.is_submit_failure() {
            if let Some(job) = self.jobs.get_mut(&key) {
                job.stderr_text = Some(format!("Job submission failed because of HTCondor event {state}"));
            }
            self.send_job_end(&key, -1, true);
        }

        if !self.options.events_enabled {
            if let Some(job) = self.jobs.get_mut(&key) {
                job.stdout_text = None;
                job.stderr_text = None;
            }
        }
    }

    fn emit_brief(&mut self, key: &JobKey, event: &str, status: Option<i32>, reason: Option<&str>) {
        let Some(job) = self.jobs.get(key) else { return };
        let fields = events::job_brief(job, event, status, reason);
        self.emit_job(event, fields);
    }

    /// `inv.start` and `inv.end` for a finished PRE or POST script.
    fn emit_script(&mut self, key: &JobKey, script: Script) {
        let Some(job) = self.jobs.get(key) else { return };
        let start = events::script_inv_start(job, script);
        let end = events::script_inv_end(job, script, self.dag.job(&key.0));
        self.emit("inv.start", start);
        self.emit("inv.end", end);
    }

    fn job_notifications(&mut self, key: &JobKey, state: &JobState, has_postscript: bool, status: Option<i32>) {
        let Some(rules) = self.notifications_due() else { return };
        let Some(job) = self.jobs.get(key) else { return };
        let due = rules.for_job(&self.notify_context(), job, state, has_postscript, status);
        self.push_notifications(due);
    }

    /// Queue `main.end` for the attempt. Unless flushed now it waits for
    /// the output of a post script run.
    fn send_job_end(&mut self, key: &JobKey, status: i32, flush: bool) {
        let user = self.manifest.user.clone();
        let Some(job) = self.jobs.get_mut(key) else { return };
        if job.main_end_sent {
            debug!(job = %key.0, seq = key.1, "main.end already sent for attempt");
            return;
        }
        let fields = events::main_end(job, Some(status), user.as_deref());
        if flush {
            self.flush_job_end(key, fields);
        } else {
            job.deferred_end = Some(fields);
        }
    }

    pub(super) fn flush_deferred_end(&mut self, key: &JobKey) {
        let deferred = self.jobs.get_mut(key).and_then(|job| job.deferred_end.take());
        if let Some(fields) = deferred {
            self.flush_job_end(key, fields);
        }
    }

    fn flush_job_end(&mut self, key: &JobKey, fields: crate::sink::Fields) {
        let policy = OutputPolicy {
            original_submit_dir: self.original_submit_dir.as_deref(),
            include_text: !self.options.skip_stdout,
            max_output_length: self.max_output_length,
        };
        let Some(job) = self.jobs.get(key) else { return };
        let end = events::complete_main_end(job, fields, policy);
        let composite = job.composite_fields(&end);
        self.emit_job("main.end", end);
        self.emit_job("composite", composite);

        if let Some(job) = self.jobs.get_mut(key) {
            job.deferred_end = None;
            job.main_end_sent = true;
            job.stdout_text = None;
            job.stderr_text = None;
        }
    }
}
