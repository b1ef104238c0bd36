// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use monitord::config::{MonitorConfig, MonitorOptions};
use monitord::fs::{FileSystem, RealFileSystem};
use monitord::scheduler::{PassReport, PollScheduler};
use monitord::sink::{EventSink, MemorySink, StructuredEvent};
use monitord::types::Timestamp;
use monitord::workflow::{Workflow, WorkflowSetup};

pub use monitord_test_utils::{LogLine, RunDir, RunDirBuilder, init_tracing};

pub fn options() -> MonitorOptions {
    MonitorOptions {
        events_enabled: true,
        follow_subworkflows: true,
        ..MonitorOptions::default()
    }
}

/// A scheduler over a real run directory, sending every workflow's events
/// to `sink`.
pub fn start(run: &RunDir, options: MonitorOptions, sink: &MemorySink) -> PollScheduler {
    start_with(run, MonitorConfig::default(), options, sink)
}

pub fn start_with(run: &RunDir, config: MonitorConfig, options: MonitorOptions, sink: &MemorySink) -> PollScheduler {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let setup = WorkflowSetup::new(run.log.clone(), &config, options.clone(), 0);
    let root = Workflow::open(fs.clone(), setup).expect("open root workflow");
    let sink = sink.clone();
    let factory = move |_: &Workflow| -> anyhow::Result<Option<Box<dyn EventSink>>> { Ok(Some(Box::new(sink.clone()))) };
    PollScheduler::new(fs, config, options, root, Box::new(factory), None).expect("scheduler")
}

/// Run passes until one reads nothing new.
pub fn pump(scheduler: &mut PollScheduler, now: Timestamp) -> PassReport {
    loop {
        let report = scheduler.run_pass(now);
        if report.lines == 0 || report.done {
            return report;
        }
    }
}

pub fn of_workflow<'a>(events: &'a [StructuredEvent], wf_uuid: &str) -> Vec<&'a StructuredEvent> {
    events.iter().filter(|e| e.get_str("xwf__id") == Some(wf_uuid)).collect()
}

/// `kind` without the `stampede.` namespace.
pub fn short(kind: &str) -> &str {
    kind.strip_prefix("stampede.").unwrap_or(kind)
}
