// src/logging.rs

//! Logging setup for `monitord` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the initial log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `-v` count (`-v` info, `-vv` debug, `-vvv` trace)
//! 3. `MONITORD_LOG` environment variable (e.g. "info", "debug")
//! 4. default to `info`
//!
//! The level sits behind a reload layer so a running daemon can be made
//! louder or quieter from a signal handler through [`LogControl`].

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

use crate::cli::LogLevel;

const LADDER: [LevelFilter; 5] = [
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Handle for changing the active level after startup.
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("level", &self.current())
            .finish()
    }
}

impl LogControl {
    pub fn current(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }

    /// One step more verbose (saturates at trace).
    pub fn raise(&self) -> Result<LevelFilter> {
        self.shift(1)
    }

    /// One step less verbose (saturates at error).
    pub fn lower(&self) -> Result<LevelFilter> {
        self.shift(-1)
    }

    fn shift(&self, delta: isize) -> Result<LevelFilter> {
        let current = self.current().unwrap_or(LevelFilter::INFO);
        let next = step_level(current, delta);
        self.handle
            .modify(|filter| *filter = next)
            .context("updating log level")?;
        Ok(next)
    }
}

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, verbose: u8) -> Result<LogControl> {
    let level = initial_level(
        cli_level,
        verbose,
        std::env::var("MONITORD_LOG").ok().as_deref(),
    );

    let (filter, handle) = reload::Layer::new(level);

    // Logs go to stderr; stdout stays clean for anything piped out.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LogControl { handle })
}

pub fn initial_level(cli_level: Option<LogLevel>, verbose: u8, env: Option<&str>) -> LevelFilter {
    if let Some(lvl) = cli_level {
        return level_from_log_level(lvl);
    }
    if verbose > 0 {
        return step_level(LevelFilter::WARN, verbose as isize);
    }
    env.and_then(parse_level_str).unwrap_or(LevelFilter::INFO)
}

pub fn step_level(current: LevelFilter, delta: isize) -> LevelFilter {
    let idx = LADDER.iter().position(|l| *l == current).unwrap_or(2) as isize;
    let next = (idx + delta).clamp(0, LADDER.len() as isize - 1);
    LADDER[next as usize]
}

fn level_from_log_level(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<LevelFilter> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(LevelFilter::ERROR),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_everything() {
        let lvl = initial_level(Some(LogLevel::Error), 3, Some("trace"));
        assert_eq!(lvl, LevelFilter::ERROR);
    }

    #[test]
    fn verbose_count_steps_up_from_warn() {
        assert_eq!(initial_level(None, 1, None), LevelFilter::INFO);
        assert_eq!(initial_level(None, 2, Some("error")), LevelFilter::DEBUG);
        assert_eq!(initial_level(None, 9, None), LevelFilter::TRACE);
    }

    #[test]
    fn env_then_default() {
        assert_eq!(initial_level(None, 0, Some("Warning")), LevelFilter::WARN);
        assert_eq!(initial_level(None, 0, Some("bogus")), LevelFilter::INFO);
        assert_eq!(initial_level(None, 0, None), LevelFilter::INFO);
    }

    #[test]
    fn stepping_saturates() {
        assert_eq!(step_level(LevelFilter::TRACE, 1), LevelFilter::TRACE);
        assert_eq!(step_level(LevelFilter::ERROR, -1), LevelFilter::ERROR);
        assert_eq!(step_level(LevelFilter::INFO, -1), LevelFilter::WARN);
    }
}
