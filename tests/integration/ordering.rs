// tests/integration/ordering.rs

use monitord::sink::MemorySink;

use crate::common::{LogLine, RunDir, RunDirBuilder, init_tracing, options, pump, short, start};

fn diamond(dir: &std::path::Path) -> RunDir {
    RunDirBuilder::new(dir, "wf-order")
        .job("prep_ID1")
        .job_with_post("work_ID2")
        .edge("prep_ID1", "work_ID2")
        .build()
        .unwrap()
}

fn full_run() -> Vec<String> {
    vec![
        LogLine::at(0).parsing("diamond-0.dag"),
        LogLine::at(1).submitting("prep_ID1"),
        LogLine::at(2).ulog("SUBMIT", "prep_ID1", 5),
        LogLine::at(3).ulog("EXECUTE", "prep_ID1", 5),
        LogLine::at(9).ulog("JOB_TERMINATED", "prep_ID1", 5),
        LogLine::at(9).job_success("prep_ID1", 5),
        LogLine::at(10).submitting("work_ID2"),
        LogLine::at(11).ulog("SUBMIT", "work_ID2", 6),
        LogLine::at(12).ulog("EXECUTE", "work_ID2", 6),
        LogLine::at(20).ulog("JOB_TERMINATED", "work_ID2", 6),
        LogLine::at(20).job_success("work_ID2", 6),
        LogLine::at(21).post_running("work_ID2"),
        LogLine::at(22).post_failure("work_ID2", 1),
        LogLine::at(23).exiting(1),
    ]
}

const STATE_EVENTS: &[&str] = &[
    "xwf.start",
    "xwf.end",
    "job_inst.submit.start",
    "job_inst.submit.end",
    "job_inst.main.start",
    "job_inst.main.term",
    "job_inst.main.end",
    "job_inst.post.start",
    "job_inst.post.end",
];

#[test]
fn events_follow_line_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let run = diamond(dir.path());
    run.append_log(&full_run()).unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, LogLine::at(30).timestamp());

    let stamped: Vec<(i64, u64)> = sink
        .events()
        .iter()
        .filter(|e| STATE_EVENTS.contains(&short(&e.kind)))
        .map(|e| {
            let ts = e.get("ts").and_then(|v| v.as_i64()).unwrap();
            let seq = e.get("job_inst__id").and_then(|v| v.as_u64()).unwrap_or(0);
            (ts, seq)
        })
        .collect();

    assert!(stamped.len() > 10);
    assert!(stamped.windows(2).all(|w| w[0].0 <= w[1].0), "timestamps out of order: {stamped:?}");

    let seqs: Vec<u64> = stamped.iter().map(|(_, s)| *s).filter(|s| *s > 0).collect();
    assert!(seqs.windows(2).all(|w| w[0] <= w[1]), "attempts out of order: {seqs:?}");
}

#[test]
fn one_main_end_per_attempt_even_with_post_script_failure() {
    let dir = tempfile::tempdir().unwrap();
    let run = diamond(dir.path());
    let mut lines = full_run();
    // The engine repeats the success line after a hiccup.
    lines.insert(6, LogLine::at(9).job_success("prep_ID1", 5));
    run.append_log(&lines).unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, LogLine::at(30).timestamp());

    let ends = sink.of_kind("stampede.job_inst.main.end");
    let for_job = |job: &str| ends.iter().filter(|e| e.get_str("job__id") == Some(job)).count();
    assert_eq!(for_job("prep_ID1"), 1);
    assert_eq!(for_job("work_ID2"), 1);

    let post = sink.of_kind("stampede.job_inst.post.end");
    assert_eq!(post.len(), 1);
    assert_eq!(post[0].get("status"), Some(&serde_json::json!(-1)));

    // The post script ran before main.end of its job was released.
    let kinds = sink.kinds();
    let post_at = kinds.iter().position(|k| k == "stampede.job_inst.post.end").unwrap();
    let work_end_at = sink
        .events()
        .iter()
        .position(|e| e.kind == "stampede.job_inst.main.end" && e.get_str("job__id") == Some("work_ID2"))
        .unwrap();
    assert!(post_at < work_end_at);
}
