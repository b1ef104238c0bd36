// tests/integration/held_release.rs

use monitord::sink::MemorySink;

use crate::common::{LogLine, RunDirBuilder, options, pump, start};

#[test]
fn held_then_released_gives_one_event_each() {
    let dir = tempfile::tempdir().unwrap();
    let run = RunDirBuilder::new(dir.path(), "wf-held").job("prep_ID1").build().unwrap();
    run.append_log(&[
        LogLine::at(0).version("8.4.2"),
        LogLine::at(1).parsing("diamond-0.dag"),
        LogLine::at(2).ulog("SUBMIT", "prep_ID1", 5),
        LogLine::at(3).ulog("JOB_HELD", "prep_ID1", 5),
        LogLine::at(3).hold_reason("Error from slot1: out of disk"),
    ])
    .unwrap();

    let sink = MemorySink::new();
    let mut scheduler = start(&run, options(), &sink);
    pump(&mut scheduler, 100);

    let held = sink.of_kind("stampede.job_inst.held.start");
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].get_str("reason"), Some("Error from slot1: out of disk"));
    assert!(sink.of_kind("stampede.job_inst.held.end").is_empty());

    run.append_log(&[LogLine::at(60).ulog("JOB_RELEASED", "prep_ID1", 5)]).unwrap();
    pump(&mut scheduler, 200);

    assert_eq!(sink.of_kind("stampede.job_inst.held.start").len(), 1);
    assert_eq!(sink.of_kind("stampede.job_inst.held.end").len(), 1);
}
