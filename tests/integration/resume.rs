// tests/integration/resume.rs

use monitord::sink::{MemorySink, StructuredEvent};

use crate::common::{LogLine, RunDir, RunDirBuilder, options, pump, short, start};

fn run_dir(dir: &std::path::Path) -> RunDir {
    RunDirBuilder::new(dir, "wf-resume")
        .job("prep_ID1")
        .job("work_ID2")
        .edge("prep_ID1", "work_ID2")
        .build()
        .unwrap()
}

fn first_half() -> Vec<String> {
    vec![
        LogLine::at(0).parsing("diamond-0.dag"),
        LogLine::at(1).ulog("SUBMIT", "prep_ID1", 5),
        LogLine::at(2).ulog("EXECUTE", "prep_ID1", 5),
        LogLine::at(8).job_success("prep_ID1", 5),
    ]
}

fn second_half() -> Vec<String> {
    vec![
        LogLine::at(10).ulog("SUBMIT", "work_ID2", 6),
        LogLine::at(11).ulog("EXECUTE", "work_ID2", 6),
        LogLine::at(19).job_success("work_ID2", 6),
        LogLine::at(20).exiting(0),
    ]
}

/// Kind, stamp and attempt of every event; paths differ between runs.
fn shape(events: &[StructuredEvent]) -> Vec<(String, Option<i64>, Option<u64>, Option<String>)> {
    events
        .iter()
        .map(|e| {
            (
                short(&e.kind).to_string(),
                e.get("ts").and_then(|v| v.as_i64()),
                e.get("job_inst__id").and_then(|v| v.as_u64()),
                e.get_str("job__id").map(str::to_string),
            )
        })
        .collect()
}

#[test]
fn restart_after_clean_stop_only_sends_new_lines() {
    // Reference: the whole log in one session.
    let reference_dir = tempfile::tempdir().unwrap();
    let reference = run_dir(reference_dir.path());
    reference.append_log(&first_half()).unwrap();
    let reference_sink = MemorySink::new();
    let mut scheduler = start(&reference, options(), &reference_sink);
    pump(&mut scheduler, 50);
    let split = reference_sink.events().len();
    reference.append_log(&second_half()).unwrap();
    pump(&mut scheduler, 60);
    let expected = shape(&reference_sink.events()[split..]);

    // Same log, but the daemon is stopped between the halves.
    let dir = tempfile::tempdir().unwrap();
    let run = run_dir(dir.path());
    run.append_log(&first_half()).unwrap();
    let first = MemorySink::new();
    let mut scheduler = start(&run, options(), &first);
    pump(&mut scheduler, 50);
    scheduler.stop(55);
    assert!(run.read("monitord.info").unwrap().contains("monitord_dagman_out_sequence 4"));

    run.append_log(&second_half()).unwrap();
    let second = MemorySink::new();
    let mut scheduler = start(&run, options(), &second);
    pump(&mut scheduler, 60);

    let events = second.events();
    assert!(second.of_kind("stampede.wf.plan").is_empty());
    assert!(events.iter().all(|e| e.get_str("job__id") != Some("prep_ID1")));
    assert_eq!(shape(&events), expected);
}

#[test]
fn restart_after_crash_resends_from_the_first_line() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_dir(dir.path());
    run.append_log(&first_half()).unwrap();

    let first = MemorySink::new();
    let mut scheduler = start(&run, options(), &first);
    pump(&mut scheduler, 50);
    // Killed without a chance to stop: only the recover file is left.
    drop(scheduler);
    assert_eq!(run.read("monitord.recover").unwrap().trim(), "line_processed 4");

    let second = MemorySink::new();
    let mut scheduler = start(&run, options(), &second);
    pump(&mut scheduler, 60);

    assert_eq!(second.of_kind("stampede.wf.plan").len(), 1);
    assert_eq!(
        shape(&second.of_kind("stampede.job_inst.main.end")),
        shape(&first.of_kind("stampede.job_inst.main.end"))
    );
}
