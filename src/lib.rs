// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod grammar;
pub mod job;
pub mod logging;
pub mod notify;
pub mod recovery;
pub mod scheduler;
pub mod sink;
pub mod tailer;
pub mod types;
pub mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::config::model::MonitorOptions;
use crate::errors::MonitordError;
use crate::fs::{FileSystem, RealFileSystem, rotate_file};
use crate::logging::LogControl;
use crate::notify::{LoggingTrigger, NoopTrigger, NotificationTrigger};
use crate::recovery::pid_file::process_alive;
use crate::recovery::{PID_FILE, PidFile};
use crate::scheduler::runtime::spawn_signal_listeners;
use crate::scheduler::{ControlEvent, PollScheduler, Runtime, SinkFactory};
use crate::sink::{EVENTS_FILE, EventSink, JsonlSink, SharedSink, destination_path};
use crate::types::DAGMAN_OUT_SUFFIX;
use crate::workflow::{Workflow, WorkflowSetup};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - argument and tuning file checks
/// - the duplicate-instance guard
/// - the root workflow and its event destination
/// - the poll scheduler and its signal-driven shell
///
/// Returns the process exit status.
pub async fn run(args: CliArgs, log_control: Option<LogControl>) -> Result<i32> {
    let log_path = check_log_path(&args.dagman_out)?;
    let run_dir = log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = load_or_default(args.config.as_deref())?;
    let options = options_from_args(&args);
    debug!(?config, ?options, "effective settings");

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let _pid_file = PidFile::acquire(
        fs.clone(),
        &run_dir.join(PID_FILE),
        std::process::id(),
        args.force,
        process_alive,
    )?;

    let now = chrono::Utc::now().timestamp();
    let setup = WorkflowSetup::new(log_path.clone(), &config, options.clone(), now);
    let root = Workflow::open(fs.clone(), setup)?;
    info!(wf_uuid = root.wf_uuid(), log = %log_path.display(), "tracking workflow");

    let sinks = sink_factory(&args, &options, fs.clone())?;
    let trigger: Box<dyn NotificationTrigger> = if options.notifications_enabled {
        Box::new(LoggingTrigger::new(
            args.notifications_max,
            args.notifications_timeout.map(Duration::from_secs),
        ))
    } else {
        Box::new(NoopTrigger)
    };

    let scheduler = PollScheduler::new(fs, config, options, root, sinks, Some(trigger))?;

    let (tx, rx) = mpsc::channel::<ControlEvent>(16);
    let listeners = spawn_signal_listeners(tx)?;

    let mut runtime = Runtime::new(scheduler, rx);
    if let Some(control) = log_control {
        runtime = runtime.with_log_control(control);
    }
    let code = runtime.run().await;

    for listener in listeners {
        listener.abort();
    }
    Ok(code)
}

/// The log must be a `.dagman.out` file in an existing directory. It
/// does not have to exist yet.
pub fn check_log_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if !name.ends_with(DAGMAN_OUT_SUFFIX) {
        return Err(MonitordError::ConfigError(format!(
            "{} does not look like an engine progress log (expected a {DAGMAN_OUT_SUFFIX} file)",
            path.display()
        ))
        .into());
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Err(MonitordError::ConfigError(format!("directory {} does not exist", dir.display())).into());
    }
    Ok(path.to_path_buf())
}

pub fn options_from_args(args: &CliArgs) -> MonitorOptions {
    // An absolute manifest belongs to some other tree; nested logs would
    // be resolved against the wrong directory.
    let absolute_manifest = args.manifest.as_deref().is_some_and(Path::is_absolute);
    MonitorOptions {
        replay: args.replay,
        keep_state: args.keep_state,
        skip_stdout: args.skip_stdout,
        follow_subworkflows: !args.no_recursive && !absolute_manifest,
        events_enabled: !args.no_events,
        notifications_enabled: !args.no_notifications && !args.replay,
        fast_start: args.fast_start,
        adjust_secs: args.adjust,
        sim_millis: args.sim_millis,
        output_dir: args.output_dir.clone(),
        manifest_override: args.manifest.clone(),
    }
}

/// Where each workflow's events go: nowhere, one shared `--dest`, or a
/// JSONL file next to the workflow's own recovery files.
fn sink_factory(args: &CliArgs, options: &MonitorOptions, fs: Arc<dyn FileSystem>) -> Result<Box<dyn SinkFactory>> {
    if !options.events_enabled {
        return Ok(Box::new(|_: &Workflow| -> Result<Option<Box<dyn EventSink>>> { Ok(None) }));
    }

    if let Some(dest) = args.dest.as_deref() {
        let path = destination_path(dest)?;
        let shared = SharedSink::new(Box::new(JsonlSink::open(&path)?));
        info!(path = %path.display(), "sending events to a shared destination");
        return Ok(Box::new(move |_: &Workflow| -> Result<Option<Box<dyn EventSink>>> {
            Ok(Some(Box::new(shared.clone())))
        }));
    }

    Ok(Box::new(move |workflow: &Workflow| -> Result<Option<Box<dyn EventSink>>> {
        let path = default_events_path(workflow);
        if workflow.starts_from_scratch() {
            if let Some(moved) = rotate_file(fs.as_ref(), &path)? {
                debug!(from = %path.display(), to = %moved.display(), "rotated previous event file");
            }
        }
        Ok(Some(Box::new(JsonlSink::open(&path)?)))
    }))
}

fn default_events_path(workflow: &Workflow) -> PathBuf {
    match workflow.output_dir() {
        Some(dir) => dir.join(format!("{}-{EVENTS_FILE}", workflow.wf_uuid())),
        None => workflow.run_dir().join(EVENTS_FILE),
    }
}
