// src/grammar/mod.rs

//! Line classification for engine progress logs.
//!
//! `patterns` holds the stateless rule table. [`LineClassifier`] adds the
//! two bits of cross-line state the log format needs: the recovery window
//! (lines replayed by a restarted engine) and the multi-line list of node
//! log files.

pub mod patterns;
pub mod timestamp;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

pub use patterns::{EngineLine, JobLine, JobTarget, Parsed};
pub use timestamp::{isodate, parse_iso, parse_timestamp};

use crate::types::Timestamp;

static RECOVERY_ENTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Running in RECOVERY mode\.\.\.").expect("valid pattern"));
static RECOVERY_DONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\.\.done with RECOVERY mode").expect("valid pattern"));
static ALL_NODE_LOGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"All DAG node user log files:").expect("valid pattern"));
static NODE_LOG_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}\s{3,}(\S+)").expect("valid pattern"));

/// Result of classifying one raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Ignored,
    Job { ts: Timestamp, events: Vec<JobLine> },
    Engine { ts: Timestamp, event: EngineLine },
}

#[derive(Debug, Default, Clone)]
pub struct LineClassifier {
    adjust: i64,
    in_recovery: bool,
    expect_node_log: bool,
}

impl LineClassifier {
    pub fn new(adjust: i64) -> Self {
        Self {
            adjust,
            ..Self::default()
        }
    }

    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    pub fn classify(&mut self, raw: &str) -> Classified {
        let line = raw.trim_end();

        let Some(ts) = parse_timestamp(line, self.adjust) else {
            if !line.is_empty() {
                debug!(line = %line, "time stamp format not recognized");
            }
            return Classified::Ignored;
        };

        if self.in_recovery {
            if RECOVERY_DONE.is_match(line) {
                debug!("leaving engine recovery window");
                self.in_recovery = false;
            }
            return Classified::Ignored;
        }

        if let Some((rule, parsed)) = patterns::match_rules(line) {
            trace!(rule, "matched log line");
            return match parsed {
                Some(Parsed::Jobs(events)) => Classified::Job { ts, events },
                Some(Parsed::Engine(event)) => Classified::Engine { ts, event },
                None => Classified::Ignored,
            };
        }

        if self.expect_node_log {
            if let Some(caps) = NODE_LOG_ENTRY.captures(line) {
                self.expect_node_log = false;
                let path = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                return Classified::Engine {
                    ts,
                    event: EngineLine::CommonLog(path),
                };
            }
        }

        if ALL_NODE_LOGS.is_match(line) {
            self.expect_node_log = true;
        } else if RECOVERY_ENTER.is_match(line) {
            debug!("entering engine recovery window");
            self.in_recovery = true;
        }

        Classified::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::state::JobState;

    #[test]
    fn recovery_window_hides_everything_until_done() {
        let mut c = LineClassifier::new(0);
        assert_eq!(c.classify("01/02/20 10:00:00 Running in RECOVERY mode... >>>"), Classified::Ignored);
        assert!(c.in_recovery());
        assert_eq!(
            c.classify("01/02/20 10:00:01 Event: ULOG_SUBMIT for HTCondor Node A (1.0.0)"),
            Classified::Ignored
        );
        assert_eq!(c.classify("01/02/20 10:00:02 ...done with RECOVERY mode <<<"), Classified::Ignored);
        let after = c.classify("01/02/20 10:00:03 Event: ULOG_SUBMIT for HTCondor Node A (1.0.0)");
        match after {
            Classified::Job { events, .. } => assert_eq!(events[0].state, JobState::Submit),
            other => panic!("expected a job event, got {other:?}"),
        }
    }

    #[test]
    fn node_log_list_continuation() {
        let mut c = LineClassifier::new(0);
        assert_eq!(c.classify("01/02/20 10:00:00 All DAG node user log files:"), Classified::Ignored);
        match c.classify("01/02/20 10:00:00       /tmp/run/wf-0.log (Condor)") {
            Classified::Engine { event, .. } => {
                assert_eq!(event, EngineLine::CommonLog("/tmp/run/wf-0.log".into()))
            }
            other => panic!("expected common log, got {other:?}"),
        }
    }

    #[test]
    fn lines_without_timestamp_are_ignored() {
        let mut c = LineClassifier::new(0);
        assert_eq!(c.classify("Event: ULOG_SUBMIT for HTCondor Node A (1.0.0)"), Classified::Ignored);
    }
}
