// tests/integration/runtime.rs

use monitord::scheduler::{ControlEvent, Runtime};
use monitord::sink::MemorySink;
use monitord::types::{EXIT_FAILURE, EXIT_OK};
use monitord_test_utils::with_timeout;
use tokio::sync::mpsc;

use crate::common::{LogLine, RunDir, RunDirBuilder, init_tracing, options, start};

fn finished_run(dir: &std::path::Path) -> RunDir {
    let run = RunDirBuilder::new(dir, "wf-rt").job("prep_ID1").build().unwrap();
    run.append_log(&[
        LogLine::at(0).parsing("diamond-0.dag"),
        LogLine::at(1).ulog("SUBMIT", "prep_ID1", 5),
        LogLine::at(9).job_success("prep_ID1", 5),
        LogLine::at(10).exiting(0),
    ])
    .unwrap();
    run
}

#[tokio::test]
async fn replay_runs_to_completion() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let run = finished_run(dir.path());

    let sink = MemorySink::new();
    let mut opts = options();
    opts.replay = true;
    let scheduler = start(&run, opts, &sink);

    let (_tx, rx) = mpsc::channel(4);
    let code = with_timeout(Runtime::new(scheduler, rx).with_clock(|| 1_000).run()).await;

    assert_eq!(code, EXIT_OK);
    assert_eq!(sink.of_kind("stampede.xwf.end").len(), 1);
    assert!(run.dir.join("monitord.done").exists());
}

#[tokio::test]
async fn stop_request_interrupts_a_live_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let run = RunDirBuilder::new(dir.path(), "wf-live").job("prep_ID1").build().unwrap();
    run.append_log(&[LogLine::at(0).parsing("diamond-0.dag")]).unwrap();

    let sink = MemorySink::new();
    let scheduler = start(&run, options(), &sink);

    let (tx, rx) = mpsc::channel(4);
    tx.send(ControlEvent::Louder).await.unwrap();
    tx.send(ControlEvent::Stop).await.unwrap();
    let code = with_timeout(Runtime::new(scheduler, rx).run()).await;

    assert_eq!(code, EXIT_FAILURE);
    assert!(run.read("monitord.info").unwrap().contains("monitord_dagman_out_sequence 1"));
    assert!(run.read("jobstate.log").unwrap().contains("MONITORD_FINISHED 1"));
}
