// tests/integration/subworkflow.rs

use std::path::Path;

use monitord::sink::MemorySink;

use crate::common::{LogLine, RunDir, RunDirBuilder, of_workflow, options, pump, start};

const JOB: &str = "subdax_inner_ID2";

fn parent(dir: &Path) -> RunDir {
    RunDirBuilder::new(dir, "wf-parent")
        .subworkflow_job(JOB, dir.join("inner/inner-0.dag.dagman.out"))
        .build()
        .unwrap()
}

fn child(dir: &Path, attempt: &str, uuid: &str) -> RunDir {
    RunDirBuilder::new(dir.join(format!("inner.{attempt}")), uuid)
        .label("inner")
        .root("wf-parent")
        .job("leaf_ID1")
        .build()
        .unwrap()
}

fn submit(at: u32, sched: u32) -> Vec<String> {
    vec![LogLine::at(at).submitting(JOB), LogLine::at(at + 1).ulog("SUBMIT", JOB, sched)]
}

fn fail(at: u32, sched: u32) -> Vec<String> {
    vec![
        LogLine::at(at).ulog("JOB_TERMINATED", JOB, sched),
        LogLine::at(at).job_failure(JOB, sched, 1),
    ]
}

#[test]
fn submit_of_a_nested_workflow_job_starts_tracking_its_log() {
    let dir = tempfile::tempdir().unwrap();
    let run = parent(dir.path());
    let first = child(dir.path(), "000", "wf-child-0");
    let retry = child(dir.path(), "001", "wf-child-1");
    run.append_log(&[LogLine::at(0).parsing("diamond-0.dag")]).unwrap();
    run.append_log(&submit(1, 7)).unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, 10);

    assert_eq!(scheduler.logs(), vec![run.log.as_path(), first.log.as_path()]);
    let events = sink.events();
    let maps: Vec<_> = of_workflow(&events, "wf-parent")
        .into_iter()
        .filter(|e| e.kind == "stampede.xwf.map.subwf_job")
        .collect();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].get_str("subwf__id"), Some("wf-child-0"));
    assert_eq!(maps[0].get_str("job__id"), Some(JOB));

    let plan = sink.of_kind("stampede.wf.plan");
    let child_plan = plan.iter().find(|e| e.get_str("xwf__id") == Some("wf-child-0")).unwrap();
    assert_eq!(child_plan.get_str("parent__xwf__id"), Some("wf-parent"));

    // The retried attempt runs in the next attempt directory.
    run.append_log(&fail(20, 7)).unwrap();
    run.append_log(&submit(30, 8)).unwrap();
    pump(&mut scheduler, 40);

    assert_eq!(
        scheduler.logs(),
        vec![run.log.as_path(), first.log.as_path(), retry.log.as_path()]
    );
    assert!(run.read("monitord.subwf").unwrap().contains("inner 1"));
}

#[test]
fn rescue_attempt_maps_the_already_tracked_log_again() {
    let dir = tempfile::tempdir().unwrap();
    let run = parent(dir.path());
    let only = child(dir.path(), "000", "wf-child-0");
    run.append_log(&[LogLine::at(0).parsing("diamond-0.dag")]).unwrap();
    run.append_log(&submit(1, 7)).unwrap();
    run.append_log(&fail(5, 7)).unwrap();
    run.append_log(&submit(6, 8)).unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, 10);

    assert_eq!(scheduler.logs(), vec![run.log.as_path(), only.log.as_path()]);
    let seqs: Vec<_> = sink
        .of_kind("stampede.xwf.map.subwf_job")
        .iter()
        .filter_map(|e| e.get("job_inst__id").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn no_recursive_leaves_nested_logs_alone() {
    let dir = tempfile::tempdir().unwrap();
    let run = parent(dir.path());
    child(dir.path(), "000", "wf-child-0");
    run.append_log(&submit(1, 7)).unwrap();

    let sink = MemorySink::new();
    let mut opts = options();
    opts.follow_subworkflows = false;
    let mut scheduler = start(&run, opts, &sink);
    pump(&mut scheduler, 10);

    assert_eq!(scheduler.active(), 1);
    assert!(sink.of_kind("stampede.xwf.map.subwf_job").is_empty());
}
