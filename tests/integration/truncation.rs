// tests/integration/truncation.rs

use monitord::config::MonitorConfig;
use monitord::sink::MemorySink;
use monitord::types::EXIT_FAILURE;

use crate::common::{LogLine, RunDirBuilder, options, pump, start, start_with};

#[test]
fn shrinking_log_ends_the_workflow_with_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let run = RunDirBuilder::new(dir.path(), "wf-trunc").job("prep_ID1").build().unwrap();
    run.append_log(&[
        LogLine::at(0).parsing("diamond-0.dag"),
        LogLine::at(1).ulog("SUBMIT", "prep_ID1", 5),
    ])
    .unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, 10);
    assert_eq!(scheduler.active(), 1);

    std::fs::write(&run.log, LogLine::at(0).text("x")).unwrap();
    let report = scheduler.run_pass(20);

    assert!(report.done);
    assert_eq!(scheduler.active(), 0);
    assert_eq!(scheduler.exit_code(), EXIT_FAILURE);

    let ends = sink.of_kind("stampede.xwf.end");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].get("status"), Some(&serde_json::json!(EXIT_FAILURE)));
    assert_eq!(ends[0].get_str("reason"), Some("log file was truncated"));
    assert!(run.dir.join("monitord.done").exists());
    assert!(!run.dir.join("monitord.recover").exists());
}

#[test]
fn log_that_never_appears_gives_up_after_the_retry_limit() {
    let dir = tempfile::tempdir().unwrap();
    let run = RunDirBuilder::new(dir.path(), "wf-missing").job("prep_ID1").build().unwrap();

    let mut config = MonitorConfig::default();
    config.tailer.appear_retries = 3;
    let sink = MemorySink::new();
    let mut scheduler = start_with(&run, config, options(), &sink);

    let first = scheduler.run_pass(0);
    assert!(!first.done);
    assert_eq!(first.sleep, std::time::Duration::from_secs(1));
    assert!(!scheduler.run_pass(1).done);
    assert!(scheduler.run_pass(2).done);
    assert_eq!(scheduler.exit_code(), EXIT_FAILURE);

    let ends = sink.of_kind("stampede.xwf.end");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].get("status"), Some(&serde_json::json!(EXIT_FAILURE)));
    assert_eq!(ends[0].get_str("reason"), Some("log file never appeared"));
}
