// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

/// Command-line arguments for `monitord`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "monitord",
    version,
    about = "Follow a DAG engine progress log and emit structured workflow events.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the engine progress log (must end in `.dagman.out`).
    #[arg(value_name = "DAGMAN_OUT")]
    pub dagman_out: PathBuf,

    /// Seconds added to every timestamp read from the log.
    #[arg(short = 'a', long, value_name = "SECS", default_value_t = 0, allow_hyphen_values = true)]
    pub adjust: i64,

    /// Accepted for compatibility with engine-launched invocations; no effect.
    #[arg(short = 'N', long = "foreground")]
    pub foreground: bool,

    /// Workflow manifest to use instead of `braindump.yml` next to the log.
    ///
    /// An absolute path disables sub-workflow following.
    #[arg(short = 'j', long = "job", value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Write jobstate and recovery files here instead of the run directory.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Optional tuning file (TOML).
    #[arg(long = "conf", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not follow sub-workflows.
    #[arg(long)]
    pub no_recursive: bool,

    /// Do not emit any events.
    #[arg(long, conflicts_with = "dest")]
    pub no_events: bool,

    /// Do not evaluate notification rules.
    #[arg(long)]
    pub no_notifications: bool,

    /// Maximum number of pending notification actions.
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub notifications_max: usize,

    /// Seconds a notification action may run before it is abandoned.
    #[arg(long, value_name = "SECS")]
    pub notifications_timeout: Option<u64>,

    /// Sleep this many milliseconds between log lines.
    #[arg(short = 'S', long = "sim", value_name = "MS")]
    pub sim_millis: Option<u64>,

    /// Re-process a complete log offline.
    #[arg(short = 'r', long)]
    pub replay: bool,

    /// Keep completed jobs across engine restarts.
    #[arg(long)]
    pub keep_state: bool,

    /// Do not attach job stdout/stderr text to events.
    #[arg(long)]
    pub skip_stdout: bool,

    /// Skip the duplicate-instance check.
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `-v`, `MONITORD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Drain existing backlog without sleeping.
    #[arg(long)]
    pub fast_start: bool,

    /// Event destination (`file:///path/events.jsonl` or a plain path).
    #[arg(short = 'd', long, value_name = "URL")]
    pub dest: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
