// tests/property/backoff.rs

use std::time::Duration;

use proptest::prelude::*;

use monitord::config::SchedulerSection;
use monitord::tailer::backoff_delay;

/// Step tables that pass validation: retry column strictly increasing,
/// sleep column non-decreasing, ceiling at least the last step.
fn table_strategy() -> impl Strategy<Value = SchedulerSection> {
    proptest::collection::vec((1u64..100, 0u64..30), 0..6).prop_flat_map(|raw| {
        let mut below = 0;
        let mut sleep = 0;
        let steps: Vec<[u64; 2]> = raw
            .into_iter()
            .map(|(gap, extra)| {
                below += gap;
                sleep += extra;
                [below, sleep]
            })
            .collect();
        let last = steps.last().map(|s| s[1]).unwrap_or(0);
        (Just(steps), last..last + 120).prop_map(|(backoff, ceiling)| SchedulerSection {
            max_sleep_secs: 10,
            backoff,
            backoff_ceiling_secs: ceiling,
        })
    })
}

proptest! {
    #[test]
    fn default_table_is_monotone_and_bounded(a in 0u32..10_000, b in 0u32..10_000) {
        let config = SchedulerSection::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (d_lo, d_hi) = (backoff_delay(lo, &config), backoff_delay(hi, &config));
        prop_assert!(d_lo <= d_hi);
        prop_assert!(d_hi <= Duration::from_secs(60));
        prop_assert!(d_lo >= Duration::from_secs(1));
    }

    #[test]
    fn any_valid_table_is_monotone(config in table_strategy(), retries in proptest::collection::vec(0u32..1_000, 2..20)) {
        let mut sorted = retries;
        sorted.sort_unstable();
        let delays: Vec<Duration> = sorted.iter().map(|r| backoff_delay(*r, &config)).collect();
        prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(delays.iter().all(|d| *d <= Duration::from_secs(config.backoff_ceiling_secs)));
    }
}
