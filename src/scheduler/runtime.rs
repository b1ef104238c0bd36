// src/scheduler/runtime.rs

use std::fmt;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::logging::LogControl;
use crate::types::Timestamp;

use super::PollScheduler;

/// Requests coming from outside the poll loop, usually from signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Finish the current pass, end every workflow and exit.
    Stop,
    /// One log level more verbose.
    Louder,
    /// One log level quieter.
    Quieter,
}

/// Async shell around [`PollScheduler`]: sleeps between passes and reacts
/// to [`ControlEvent`]s while sleeping.
pub struct Runtime {
    scheduler: PollScheduler,
    control_rx: mpsc::Receiver<ControlEvent>,
    log_control: Option<LogControl>,
    clock: fn() -> Timestamp,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(scheduler: PollScheduler, control_rx: mpsc::Receiver<ControlEvent>) -> Self {
        Self {
            scheduler,
            control_rx,
            log_control: None,
            clock: wall_clock,
        }
    }

    pub fn with_log_control(mut self, log_control: LogControl) -> Self {
        self.log_control = Some(log_control);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Poll until every workflow ended or a stop was requested. Returns
    /// the process exit status.
    pub async fn run(mut self) -> i32 {
        info!(logs = self.scheduler.active(), "monitoring started");
        let mut control_open = true;

        loop {
            let report = self.scheduler.run_pass((self.clock)());
            debug!(?report, "pass complete");
            if report.done {
                break;
            }

            let sleep = tokio::time::sleep(report.sleep);
            tokio::pin!(sleep);

            let mut stop = false;
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    event = self.control_rx.recv(), if control_open => match event {
                        Some(ControlEvent::Stop) => {
                            stop = true;
                            break;
                        }
                        Some(event) => self.adjust_logging(event),
                        None => control_open = false,
                    },
                }
            }
            if stop {
                self.scheduler.stop((self.clock)());
                break;
            }
        }

        let code = self.scheduler.exit_code();
        info!(exit_code = code, "monitoring finished");
        code
    }

    fn adjust_logging(&self, event: ControlEvent) {
        let Some(control) = self.log_control.as_ref() else {
            return;
        };
        let result = match event {
            ControlEvent::Louder => control.raise(),
            ControlEvent::Quieter => control.lower(),
            ControlEvent::Stop => return,
        };
        match result {
            Ok(level) => info!(%level, "log level changed"),
            Err(err) => warn!(error = %err, "cannot change log level"),
        }
    }
}

fn wall_clock() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Turn process signals into [`ControlEvent`]s.
///
/// `SIGINT`/`SIGTERM` stop, `SIGUSR1`/`SIGUSR2` change verbosity and
/// `SIGHUP` is swallowed so a closed terminal does not kill the daemon.
pub fn spawn_signal_listeners(tx: mpsc::Sender<ControlEvent>) -> Result<Vec<JoinHandle<()>>> {
    let table = [
        (SignalKind::interrupt(), Some(ControlEvent::Stop)),
        (SignalKind::terminate(), Some(ControlEvent::Stop)),
        (SignalKind::user_defined1(), Some(ControlEvent::Louder)),
        (SignalKind::user_defined2(), Some(ControlEvent::Quieter)),
        (SignalKind::hangup(), None),
    ];

    let mut handles = Vec::with_capacity(table.len());
    for (kind, event) in table {
        let mut stream = signal(kind).with_context(|| format!("installing handler for signal {}", kind.as_raw_value()))?;
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                let Some(event) = event else {
                    debug!(signal = kind.as_raw_value(), "ignoring signal");
                    continue;
                };
                info!(signal = kind.as_raw_value(), ?event, "signal received");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }));
    }
    Ok(handles)
}
