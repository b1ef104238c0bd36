// tests/property/tailer.rs

use std::sync::Arc;

use proptest::prelude::*;

use monitord::config::TailerSection;
use monitord::fs::mock::MockFileSystem;
use monitord::tailer::{LogTailer, TailPoll};

const LOG: &str = "/run/wf.dag.dagman.out";

proptest! {
    #[test]
    fn missing_log_gives_up_after_exactly_the_retry_limit(limit in 1u32..200) {
        let fs = MockFileSystem::new();
        let config = TailerSection { appear_retries: limit, ..TailerSection::default() };
        let mut tailer = LogTailer::new(Arc::new(fs), LOG, &config, false);

        for n in 1..limit {
            prop_assert_eq!(tailer.poll(), TailPoll::Missing { retries: n });
        }
        prop_assert_eq!(tailer.poll(), TailPoll::NeverAppeared);
    }

    /// However the bytes are split across appends and chunk sizes, the
    /// lines come out whole, once and in order.
    #[test]
    fn lines_survive_arbitrary_chunking(
        lines in proptest::collection::vec("[a-z ]{0,12}", 1..30),
        cuts in proptest::collection::vec(1usize..40, 1..10),
        chunk_size in 1usize..64,
    ) {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let bytes = text.as_bytes();

        let fs = MockFileSystem::new();
        fs.add_file(LOG, Vec::<u8>::new());
        let config = TailerSection { chunk_size, stale_polls: u32::MAX, ..TailerSection::default() };
        let mut tailer = LogTailer::new(Arc::new(fs.clone()), LOG, &config, false);

        let mut seen = Vec::new();
        let mut written = 0;
        let mut cut = cuts.iter().cycle();
        while written < bytes.len() {
            let step = (*cut.next().unwrap()).min(bytes.len() - written);
            fs.append_bytes(LOG, &bytes[written..written + step]);
            written += step;
            loop {
                match tailer.poll() {
                    TailPoll::Lines(batch) => seen.extend(batch),
                    TailPoll::NoNewData { .. } => break,
                    other => prop_assert!(false, "unexpected poll result {:?}", other),
                }
            }
        }
        prop_assert_eq!(seen, lines);
    }
}
