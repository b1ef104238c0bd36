// src/scheduler/mod.rs

//! Round-robin driver of every tracked workflow.
//!
//! [`PollScheduler`] is synchronous and owns no timers: one call to
//! [`PollScheduler::run_pass`] polls each log once, feeds the new lines to
//! its workflow, hands the resulting events to the sinks and reports how
//! long the caller should sleep. The async shell in [`runtime`] does the
//! sleeping and the signal handling.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::config::model::{MonitorConfig, MonitorOptions};
use crate::fs::FileSystem;
use crate::notify::NotificationTrigger;
use crate::recovery::pid_file::process_alive;
use crate::recovery::{RETRIES_FILE, SubworkflowRetries};
use crate::sink::EventSink;
use crate::tailer::{LogTailer, TailPoll, backoff_delay};
use crate::types::{EXIT_OK, EndReason, Timestamp};
use crate::workflow::subworkflow::SubworkflowLink;
use crate::workflow::{LineOutcome, ParentLink, Workflow, WorkflowEffect, WorkflowSetup};

pub mod runtime;

pub use runtime::{ControlEvent, Runtime};

/// Opens the event destination of a newly tracked workflow. `None` means
/// the workflow's events are dropped.
pub trait SinkFactory: Send {
    fn open(&mut self, workflow: &Workflow) -> Result<Option<Box<dyn EventSink>>>;
}

impl<F> SinkFactory for F
where
    F: FnMut(&Workflow) -> Result<Option<Box<dyn EventSink>>> + Send,
{
    fn open(&mut self, workflow: &Workflow) -> Result<Option<Box<dyn EventSink>>> {
        self(workflow)
    }
}

/// What one pass did and what to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// How long to wait before the next pass.
    pub sleep: Duration,
    /// Nothing is tracked any more.
    pub done: bool,
    /// Log lines fed to workflows during this pass.
    pub lines: usize,
    /// Workflows still tracked after this pass.
    pub active: usize,
}

#[derive(Debug)]
struct Entry {
    workflow: Workflow,
    tailer: LogTailer,
    /// Lines read but not processed yet (only non-empty in `--sim` mode).
    pending: VecDeque<String>,
    sink: Option<Box<dyn EventSink>>,
    sink_failed: bool,
}

struct EntryPoll {
    delay: Duration,
    caught_up: bool,
    lines: usize,
}

pub struct PollScheduler {
    fs: Arc<dyn FileSystem>,
    config: MonitorConfig,
    options: MonitorOptions,
    entries: Vec<Entry>,
    sinks: Box<dyn SinkFactory>,
    trigger: Option<Box<dyn NotificationTrigger>>,
    retries: SubworkflowRetries,
    alive: fn(i32) -> bool,
    /// Cleared once every log was caught up at least once.
    fast_start: bool,
    root_exit_code: Option<i32>,
}

impl fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollScheduler")
            .field("entries", &self.entries)
            .field("fast_start", &self.fast_start)
            .field("root_exit_code", &self.root_exit_code)
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    /// Start tracking `root`. Fails when its event destination cannot be
    /// opened.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        config: MonitorConfig,
        options: MonitorOptions,
        root: Workflow,
        mut sinks: Box<dyn SinkFactory>,
        trigger: Option<Box<dyn NotificationTrigger>>,
    ) -> Result<Self> {
        let state_dir = root.output_dir().unwrap_or(root.run_dir()).to_path_buf();
        let retries = SubworkflowRetries::open(fs.clone(), &state_dir.join(RETRIES_FILE));
        let sink = sinks.open(&root)?;
        let tailer = LogTailer::new(fs.clone(), root.log_path(), &config.tailer, options.replay);
        let fast_start = options.fast_start;

        let mut scheduler = Self {
            fs,
            config,
            options,
            entries: Vec::new(),
            sinks,
            trigger,
            retries,
            alive: process_alive,
            fast_start,
            root_exit_code: None,
        };
        let mut entry = Entry {
            workflow: root,
            tailer,
            pending: VecDeque::new(),
            sink,
            sink_failed: false,
        };
        // Planning events queued by `Workflow::open`.
        scheduler.deliver(&mut entry);
        scheduler.entries.push(entry);
        Ok(scheduler)
    }

    /// Replace the process liveness check.
    pub fn with_liveness(mut self, alive: fn(i32) -> bool) -> Self {
        self.alive = alive;
        self
    }

    pub fn active(&self) -> usize {
        self.entries.len()
    }

    /// Logs currently followed, in discovery order.
    pub fn logs(&self) -> Vec<&Path> {
        self.entries.iter().map(|e| e.tailer.path()).collect()
    }

    /// Exit status of the root workflow, once it ended.
    pub fn exit_code(&self) -> i32 {
        self.root_exit_code.unwrap_or(EXIT_OK)
    }

    pub fn run_pass(&mut self, now: Timestamp) -> PassReport {
        let mut sleep = self.config.scheduler.max_sleep();
        let mut lines = 0;
        let mut all_caught_up = true;
        let mut discovered = Vec::new();

        let mut entries = std::mem::take(&mut self.entries);
        for entry in &mut entries {
            let polled = self.poll_entry(entry, now, &mut discovered);
            self.deliver(entry);
            sleep = sleep.min(polled.delay);
            all_caught_up &= polled.caught_up;
            lines += polled.lines;
        }
        self.entries = entries;

        for link in discovered {
            self.follow(link, now);
        }
        self.remove_ended();

        if let Some(trigger) = self.trigger.as_mut() {
            trigger.service();
        }

        if self.fast_start {
            if all_caught_up {
                info!("caught up with every log, leaving fast start");
                self.fast_start = false;
            } else {
                sleep = Duration::ZERO;
            }
        }
        if self.options.replay {
            sleep = Duration::ZERO;
        }

        let done = self.entries.is_empty();
        if done {
            self.shutdown();
        }
        PassReport {
            sleep,
            done,
            lines,
            active: self.entries.len(),
        }
    }

    /// End every workflow because the daemon was told to stop.
    pub fn stop(&mut self, now: Timestamp) {
        info!(active = self.entries.len(), "stopping, ending every tracked workflow");
        let mut entries = std::mem::take(&mut self.entries);
        for entry in &mut entries {
            entry.workflow.finish(EndReason::Interrupted, now);
            self.deliver(entry);
        }
        self.entries = entries;
        self.remove_ended();
        self.shutdown();
    }

    fn poll_entry(&mut self, entry: &mut Entry, now: Timestamp, discovered: &mut Vec<SubworkflowLink>) -> EntryPoll {
        let idle = |delay| EntryPoll {
            delay,
            caught_up: true,
            lines: 0,
        };

        if entry.pending.is_empty() {
            match entry.tailer.poll() {
                TailPoll::Lines(lines) => entry.pending.extend(lines),
                TailPoll::Missing { retries } => {
                    return idle(backoff_delay(retries, &self.config.scheduler));
                }
                TailPoll::NoNewData { idle_polls } => {
                    if let Some(reason) = self.idle_verdict(&entry.workflow, idle_polls) {
                        entry.workflow.finish(reason, now);
                        return idle(Duration::ZERO);
                    }
                    return idle(backoff_delay(idle_polls, &self.config.scheduler));
                }
                TailPoll::NeverAppeared => {
                    error!(wf_uuid = entry.workflow.wf_uuid(), log = %entry.tailer.path().display(), "log never appeared");
                    entry.workflow.finish(EndReason::NeverAppeared, now);
                    return idle(Duration::ZERO);
                }
                TailPoll::Truncated => {
                    error!(wf_uuid = entry.workflow.wf_uuid(), log = %entry.tailer.path().display(), "log was truncated");
                    entry.workflow.finish(EndReason::Truncated, now);
                    return idle(Duration::ZERO);
                }
                TailPoll::Stale => {
                    error!(
                        wf_uuid = entry.workflow.wf_uuid(),
                        log = %entry.tailer.path().display(),
                        retries = entry.tailer.retries(),
                        "log went stale"
                    );
                    entry.workflow.finish(EndReason::Stale, now);
                    return idle(Duration::ZERO);
                }
            }
        }

        let take = match self.options.sim_millis {
            Some(_) => entry.pending.len().min(1),
            None => entry.pending.len(),
        };
        for line in entry.pending.drain(..take) {
            if let LineOutcome::FollowSubworkflow(link) = entry.workflow.process_line(&line) {
                discovered.push(link);
            }
        }

        let delay = match self.options.sim_millis {
            Some(ms) => Duration::from_millis(ms),
            None => backoff_delay(0, &self.config.scheduler),
        };
        EntryPoll {
            delay,
            caught_up: entry.pending.is_empty() && entry.tailer.caught_up(),
            lines: take,
        }
    }

    /// Decide whether a log without new data is finished for good.
    fn idle_verdict(&self, workflow: &Workflow, idle_polls: u32) -> Option<EndReason> {
        if self.options.replay {
            return (idle_polls >= self.config.tailer.replay_idle_polls).then_some(EndReason::ReplayComplete);
        }
        if workflow.engine_exited() {
            return Some(EndReason::Finished);
        }
        let pid = workflow.dagman_pid();
        if idle_polls >= self.config.tailer.liveness_after_polls && pid > 0 && !(self.alive)(pid) {
            warn!(wf_uuid = workflow.wf_uuid(), pid, idle_polls, "engine process is gone");
            return Some(EndReason::LostContact);
        }
        None
    }

    /// Hand queued events to the sink and notifications to the trigger,
    /// then persist progress.
    fn deliver(&mut self, entry: &mut Entry) {
        let wf_uuid = entry.workflow.wf_uuid().to_string();
        for effect in entry.workflow.drain_effects() {
            match effect {
                WorkflowEffect::Event(event) => {
                    if entry.sink_failed {
                        continue;
                    }
                    let Some(sink) = entry.sink.as_mut() else { continue };
                    if let Err(err) = sink.send(&event) {
                        warn!(wf_uuid = %wf_uuid, error = %err, "event sink failed, disabling event output for this workflow");
                        entry.sink_failed = true;
                    }
                }
                WorkflowEffect::Notify(notification) => {
                    if let Some(trigger) = self.trigger.as_mut() {
                        trigger.dispatch(notification);
                    }
                }
            }
        }

        if !entry.sink_failed {
            if let Some(sink) = entry.sink.as_mut() {
                if let Err(err) = sink.flush() {
                    warn!(wf_uuid = %wf_uuid, error = %err, "event sink flush failed, disabling event output for this workflow");
                    entry.sink_failed = true;
                }
            }
        }
        entry.workflow.checkpoint();
    }

    fn follow(&mut self, link: SubworkflowLink, now: Timestamp) {
        if let Some(idx) = self.entries.iter().position(|e| e.tailer.path() == link.log) {
            debug!(log = %link.log.display(), job = %link.parent_job, "nested workflow already tracked");
            let mut entry = self.entries.remove(idx);
            entry.workflow.map_subwf(&link.parent_job, link.parent_seq);
            self.deliver(&mut entry);
            self.entries.insert(idx, entry);
            return;
        }

        if let Err(err) = self.retries.record(&link.retry_dir, link.retry) {
            warn!(dir = %link.retry_dir.display(), error = %err, "cannot record nested workflow retry");
        }

        let mut setup = WorkflowSetup::new(link.log.clone(), &self.config, self.options.clone(), now);
        setup.parent = Some(ParentLink::from(&link));
        let workflow = match Workflow::open(self.fs.clone(), setup) {
            Ok(workflow) => workflow,
            Err(err) => {
                warn!(log = %link.log.display(), job = %link.parent_job, error = %err, "cannot track nested workflow");
                return;
            }
        };
        let sink = match self.sinks.open(&workflow) {
            Ok(sink) => sink,
            Err(err) => {
                warn!(wf_uuid = workflow.wf_uuid(), error = %err, "cannot open event sink for nested workflow");
                None
            }
        };

        info!(
            wf_uuid = workflow.wf_uuid(),
            parent = %link.parent_wf_uuid,
            job = %link.parent_job,
            log = %link.log.display(),
            "tracking nested workflow"
        );
        let tailer = LogTailer::new(self.fs.clone(), link.log.clone(), &self.config.tailer, self.options.replay);
        let mut entry = Entry {
            workflow,
            tailer,
            pending: VecDeque::new(),
            sink,
            sink_failed: false,
        };
        self.deliver(&mut entry);
        self.entries.push(entry);
    }

    fn remove_ended(&mut self) {
        let (ended, active): (Vec<Entry>, Vec<Entry>) =
            std::mem::take(&mut self.entries).into_iter().partition(|e| e.workflow.is_ended());
        self.entries = active;

        for mut entry in ended {
            self.deliver(&mut entry);
            if let Some(mut sink) = entry.sink.take() {
                if let Err(err) = sink.close() {
                    warn!(wf_uuid = entry.workflow.wf_uuid(), error = %err, "cannot close event sink");
                }
            }
            if entry.workflow.parent().is_none() {
                self.root_exit_code = Some(entry.workflow.monitord_exit_code());
            }
            info!(
                wf_uuid = entry.workflow.wf_uuid(),
                exit_code = entry.workflow.monitord_exit_code(),
                "stopped tracking workflow"
            );
        }
    }

    fn shutdown(&mut self) {
        if let Some(trigger) = self.trigger.as_mut() {
            trigger.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::sink::MemorySink;
    use crate::types::EXIT_LOST_CONTACT;

    const LOG: &str = "/run/wf/diamond-0.dag.dagman.out";

    fn fixture() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/run/wf/braindump.yml",
            "wf_uuid: wf-1\ndag: diamond-0.dag\ndax_label: diamond\ndax_index: '0'\nsubmit_dir: /run/wf\n",
        );
        fs.add_file("/run/wf/diamond-0.dag", "JOB prep_ID1 prep_ID1.sub\n");
        fs.add_file("/run/wf/prep_ID1.sub", "output = prep_ID1.out\nerror = prep_ID1.err\n");
        fs
    }

    fn options() -> MonitorOptions {
        MonitorOptions {
            events_enabled: true,
            follow_subworkflows: true,
            ..MonitorOptions::default()
        }
    }

    fn scheduler(fs: &MockFileSystem, options: MonitorOptions, sink: &MemorySink) -> PollScheduler {
        let config = MonitorConfig::default();
        let setup = WorkflowSetup::new(PathBuf::from(LOG), &config, options.clone(), 1_000);
        let root = Workflow::open(Arc::new(fs.clone()), setup).unwrap();
        let sink = sink.clone();
        let factory = move |_: &Workflow| -> Result<Option<Box<dyn EventSink>>> { Ok(Some(Box::new(sink.clone()))) };
        PollScheduler::new(Arc::new(fs.clone()), config, options, root, Box::new(factory), None).unwrap()
    }

    fn line(ts: &str, text: &str) -> String {
        format!("2024-01-02 {ts}+00:00 {text}\n")
    }

    #[test]
    fn feeds_lines_and_flushes_every_pass() {
        let fs = fixture();
        fs.add_file(LOG, line("10:00:00", "Parsing /run/wf/diamond-0.dag ..."));
        let sink = MemorySink::new();
        let mut sched = scheduler(&fs, options(), &sink);

        let report = sched.run_pass(2_000);
        assert_eq!(report.lines, 1);
        assert_eq!(report.sleep, Duration::from_secs(1));
        assert!(!report.done);
        assert!(sink.kinds().contains(&"stampede.xwf.start".to_string()));
        assert_eq!(sink.flush_count(), 2);
    }

    #[test]
    fn engine_exit_ends_the_workflow_once_idle() {
        let fs = fixture();
        fs.add_file(
            LOG,
            [
                line("10:00:00", "Parsing /run/wf/diamond-0.dag ..."),
                line("10:05:00", "** (condor_DAGMAN) pid 77 EXITING WITH STATUS 0"),
            ]
            .concat(),
        );
        let sink = MemorySink::new();
        let mut sched = scheduler(&fs, options(), &sink);

        assert!(!sched.run_pass(2_000).done);
        let report = sched.run_pass(2_001);
        assert!(report.done);
        assert_eq!(sched.exit_code(), EXIT_OK);
        assert!(fs.exists(Path::new("/run/wf/monitord.done")));
        assert_eq!(sink.of_kind("stampede.xwf.end").len(), 1);
    }

    #[test]
    fn vanished_engine_means_lost_contact() {
        let fs = fixture();
        fs.add_file(
            LOG,
            [
                line("10:00:00", "** PID = 4242"),
                line("10:00:01", "Parsing /run/wf/diamond-0.dag ..."),
            ]
            .concat(),
        );
        let sink = MemorySink::new();
        let mut sched = scheduler(&fs, options(), &sink).with_liveness(|_| false);

        let liveness_after = MonitorConfig::default().tailer.liveness_after_polls;
        let mut report = sched.run_pass(2_000);
        for n in 0..liveness_after {
            assert!(!report.done, "ended after {n} idle polls");
            report = sched.run_pass(2_001 + i64::from(n));
        }
        assert!(report.done);
        assert_eq!(sched.exit_code(), EXIT_LOST_CONTACT);

        let ends = sink.of_kind("stampede.xwf.end");
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].get("status"), Some(&serde_json::json!(EXIT_LOST_CONTACT)));
    }

    #[test]
    fn replay_ends_after_a_few_idle_passes_without_sleeping() {
        let fs = fixture();
        fs.add_file(LOG, line("10:00:00", "Parsing /run/wf/diamond-0.dag ..."));
        let sink = MemorySink::new();
        let mut sched = scheduler(
            &fs,
            MonitorOptions {
                replay: true,
                ..options()
            },
            &sink,
        );

        let mut passes = 0;
        loop {
            let report = sched.run_pass(2_000);
            assert_eq!(report.sleep, Duration::ZERO);
            passes += 1;
            if report.done {
                break;
            }
        }
        assert_eq!(passes, 1 + MonitorConfig::default().tailer.replay_idle_polls);
    }

    #[test]
    fn fast_start_does_not_sleep_until_caught_up() {
        let fs = fixture();
        let body: String = (0..3000).map(|n| line("10:00:00", &format!("noise {n}"))).collect();
        fs.add_file(LOG, body);
        let sink = MemorySink::new();
        let mut sched = scheduler(
            &fs,
            MonitorOptions {
                fast_start: true,
                ..options()
            },
            &sink,
        );

        let first = sched.run_pass(2_000);
        assert_eq!(first.sleep, Duration::ZERO);
        let mut report = first;
        while report.sleep == Duration::ZERO {
            report = sched.run_pass(2_000);
        }
        assert_eq!(report.sleep, Duration::from_secs(1));
    }

    #[test]
    fn sim_mode_feeds_one_line_per_pass() {
        let fs = fixture();
        fs.add_file(LOG, [line("10:00:00", "a"), line("10:00:01", "b")].concat());
        let sink = MemorySink::new();
        let mut sched = scheduler(
            &fs,
            MonitorOptions {
                sim_millis: Some(250),
                ..options()
            },
            &sink,
        );

        let report = sched.run_pass(2_000);
        assert_eq!((report.lines, report.sleep), (1, Duration::from_millis(250)));
        assert_eq!(sched.run_pass(2_000).lines, 1);
        assert_eq!(sched.run_pass(2_000).lines, 0);
    }

    #[test]
    fn failing_sink_is_disabled_not_fatal() {
        let fs = fixture();
        fs.add_file(LOG, line("10:00:00", "Parsing /run/wf/diamond-0.dag ..."));
        let sink = MemorySink::failing_after(1);
        let mut sched = scheduler(&fs, options(), &sink);

        let report = sched.run_pass(2_000);
        assert!(!report.done);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sched.active(), 1);
    }

    #[test]
    fn stop_interrupts_every_workflow() {
        let fs = fixture();
        fs.add_file(LOG, line("10:00:00", "Parsing /run/wf/diamond-0.dag ..."));
        let sink = MemorySink::new();
        let mut sched = scheduler(&fs, options(), &sink);
        sched.run_pass(2_000);

        sched.stop(2_010);
        assert_eq!(sched.active(), 0);
        assert_eq!(sched.exit_code(), EndReason::Interrupted.exit_code());
        assert!(sink.of_kind("stampede.xwf.end").is_empty());
        assert!(fs.read_to_string(Path::new("/run/wf/monitord.info")).is_ok());
    }
}
