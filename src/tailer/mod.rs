// src/tailer/mod.rs

//! Incremental reader of one growing progress log.
//!
//! The tailer hands out whole lines only. Bytes after the last newline stay
//! buffered until the rest of the line shows up. It never seeks backwards:
//! a file that got smaller than what was already read is reported as
//! truncated and the caller gives up on it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::model::{SchedulerSection, TailerSection};
use crate::fs::FileSystem;

/// Result of one [`LogTailer::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailPoll {
    /// The log does not exist yet; `retries` polls found it missing so far.
    Missing { retries: u32 },
    /// The log never showed up, or vanished in replay mode.
    NeverAppeared,
    /// Nothing new since the last poll.
    NoNewData { idle_polls: u32 },
    /// Complete lines read by this poll, without their line terminators.
    Lines(Vec<String>),
    /// The file shrank below what was already consumed.
    Truncated,
    /// No new data for too long.
    Stale,
}

#[derive(Debug)]
pub struct LogTailer {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    chunk_size: usize,
    appear_retries: u32,
    stale_polls: u32,
    replay: bool,

    opened: bool,
    offset: u64,
    last_size: u64,
    partial: Vec<u8>,
    missing_retries: u32,
    idle_polls: u32,
    caught_up: bool,
}

impl LogTailer {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>, config: &TailerSection, replay: bool) -> Self {
        Self {
            fs,
            path: path.into(),
            chunk_size: config.chunk_size.max(1),
            appear_retries: config.appear_retries,
            stale_polls: config.stale_polls,
            replay,
            opened: false,
            offset: 0,
            last_size: 0,
            partial: Vec::new(),
            missing_retries: 0,
            idle_polls: 0,
            caught_up: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last read returned less than a full chunk.
    pub fn caught_up(&self) -> bool {
        self.caught_up
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Polls in a row that found the file missing (before it appeared) or
    /// without new bytes (after).
    pub fn retries(&self) -> u32 {
        if self.opened { self.idle_polls } else { self.missing_retries }
    }

    pub fn poll(&mut self) -> TailPoll {
        let size = match self.fs.len(&self.path) {
            Ok(size) => size,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cannot stat log, will retry");
                return TailPoll::NoNewData {
                    idle_polls: self.idle_polls,
                };
            }
        };

        let Some(size) = size else {
            return self.missing();
        };

        if !self.opened {
            debug!(path = %self.path.display(), retries = self.missing_retries, "log appeared");
            self.opened = true;
        }

        if size < self.last_size || size < self.offset {
            warn!(
                path = %self.path.display(),
                size,
                previous = self.last_size,
                "log shrank, giving up on it"
            );
            return TailPoll::Truncated;
        }
        self.last_size = size;

        if size == self.offset {
            return self.idle();
        }

        let bytes = match self.fs.read_at(&self.path, self.offset, self.chunk_size) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %self.path.display(), offset = self.offset, error = %err, "read failed, will retry");
                return TailPoll::NoNewData {
                    idle_polls: self.idle_polls,
                };
            }
        };
        if bytes.is_empty() {
            return self.idle();
        }

        self.offset += bytes.len() as u64;
        self.caught_up = bytes.len() < self.chunk_size;
        self.idle_polls = 0;
        trace!(path = %self.path.display(), read = bytes.len(), offset = self.offset, "read chunk");

        self.partial.extend_from_slice(&bytes);
        TailPoll::Lines(self.split_lines())
    }

    fn missing(&mut self) -> TailPoll {
        if self.opened {
            if self.replay {
                return TailPoll::NeverAppeared;
            }
            warn!(path = %self.path.display(), "log disappeared");
            return TailPoll::Truncated;
        }
        if self.replay {
            warn!(path = %self.path.display(), "log to replay does not exist");
            return TailPoll::NeverAppeared;
        }
        self.missing_retries += 1;
        if self.missing_retries >= self.appear_retries {
            warn!(path = %self.path.display(), retries = self.missing_retries, "log never appeared");
            return TailPoll::NeverAppeared;
        }
        debug!(path = %self.path.display(), retries = self.missing_retries, "log not there yet");
        TailPoll::Missing {
            retries: self.missing_retries,
        }
    }

    fn idle(&mut self) -> TailPoll {
        self.caught_up = true;

        // A replayed log is complete, so its last line may lack a newline.
        if self.replay && !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            return TailPoll::Lines(vec![decode(&rest)]);
        }

        self.idle_polls += 1;
        if self.idle_polls >= self.stale_polls {
            warn!(path = %self.path.display(), idle_polls = self.idle_polls, "no new data for too long");
            return TailPoll::Stale;
        }
        TailPoll::NoNewData {
            idle_polls: self.idle_polls,
        }
    }

    fn split_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(decode)
            .collect()
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// How long to wait before polling again after `retries` unproductive
/// polls. Non-decreasing in `retries` for any validated table.
pub fn backoff_delay(retries: u32, config: &SchedulerSection) -> Duration {
    let secs = config
        .backoff
        .iter()
        .find(|[below, _]| u64::from(retries) < *below)
        .map(|[_, sleep]| *sleep)
        .unwrap_or(config.backoff_ceiling_secs);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    const LOG: &str = "/run/wf.dag.dagman.out";

    fn tailer(fs: &MockFileSystem, replay: bool) -> LogTailer {
        let config = TailerSection {
            chunk_size: 16,
            appear_retries: 3,
            stale_polls: 4,
            ..TailerSection::default()
        };
        LogTailer::new(Arc::new(fs.clone()), LOG, &config, replay)
    }

    #[test]
    fn holds_back_partial_lines() {
        let fs = MockFileSystem::new();
        fs.add_file(LOG, "one\ntw");
        let mut t = tailer(&fs, false);

        assert_eq!(t.poll(), TailPoll::Lines(vec!["one".into()]));
        assert!(t.caught_up());

        fs.append_bytes(LOG, b"o\r\nthree\n");
        assert_eq!(t.poll(), TailPoll::Lines(vec!["two".into(), "three".into()]));
    }

    #[test]
    fn reads_at_most_one_chunk_per_poll() {
        let fs = MockFileSystem::new();
        fs.add_file(LOG, "aaaaaaa\nbbbbbbb\ncccccc\n");
        let mut t = tailer(&fs, false);

        assert_eq!(t.poll(), TailPoll::Lines(vec!["aaaaaaa".into(), "bbbbbbb".into()]));
        assert!(!t.caught_up());
        assert_eq!(t.poll(), TailPoll::Lines(vec!["cccccc".into()]));
        assert!(t.caught_up());
    }

    #[test]
    fn missing_log_counts_retries_then_gives_up() {
        let fs = MockFileSystem::new();
        let mut t = tailer(&fs, false);

        assert_eq!(t.poll(), TailPoll::Missing { retries: 1 });
        assert_eq!(t.poll(), TailPoll::Missing { retries: 2 });
        assert_eq!(t.retries(), 2);
        assert_eq!(t.poll(), TailPoll::NeverAppeared);
    }

    #[test]
    fn replay_does_not_wait_for_the_log() {
        let fs = MockFileSystem::new();
        let mut t = tailer(&fs, true);
        assert_eq!(t.poll(), TailPoll::NeverAppeared);
    }

    #[test]
    fn replay_flushes_an_unterminated_last_line() {
        let fs = MockFileSystem::new();
        fs.add_file(LOG, "a\nb");
        let mut t = tailer(&fs, true);
        assert_eq!(t.poll(), TailPoll::Lines(vec!["a".into()]));
        assert_eq!(t.poll(), TailPoll::Lines(vec!["b".into()]));
        assert_eq!(t.poll(), TailPoll::NoNewData { idle_polls: 1 });
    }

    #[test]
    fn shrinking_log_is_truncated() {
        let fs = MockFileSystem::new();
        fs.add_file(LOG, "first line\n");
        let mut t = tailer(&fs, false);
        assert!(matches!(t.poll(), TailPoll::Lines(_)));

        fs.add_file(LOG, "x\n");
        assert_eq!(t.poll(), TailPoll::Truncated);
    }

    #[test]
    fn idle_log_goes_stale() {
        let fs = MockFileSystem::new();
        fs.add_file(LOG, "x\n");
        let mut t = tailer(&fs, false);
        t.poll();
        for n in 1..4 {
            assert_eq!(t.poll(), TailPoll::NoNewData { idle_polls: n });
        }
        assert_eq!(t.poll(), TailPoll::Stale);
    }

    #[test]
    fn backoff_follows_the_step_table() {
        let config = SchedulerSection::default();
        assert_eq!(backoff_delay(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_delay(4, &config), Duration::from_secs(1));
        assert_eq!(backoff_delay(5, &config), Duration::from_secs(5));
        assert_eq!(backoff_delay(499, &config), Duration::from_secs(30));
        assert_eq!(backoff_delay(500, &config), Duration::from_secs(60));
    }
}
