// src/config/validate.rs

use crate::config::model::{MonitorConfig, RawConfigFile};
use crate::errors::{MonitordError, Result};

impl TryFrom<RawConfigFile> for MonitorConfig {
    type Error = MonitordError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(MonitorConfig::new_unchecked(raw.tailer, raw.scheduler, raw.output))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_tailer(cfg)?;
    validate_backoff(cfg)?;
    Ok(())
}

fn validate_tailer(cfg: &RawConfigFile) -> Result<()> {
    if cfg.tailer.chunk_size == 0 {
        return Err(MonitordError::ConfigError(
            "[tailer].chunk_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.tailer.stale_polls == 0 {
        return Err(MonitordError::ConfigError(
            "[tailer].stale_polls must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_backoff(cfg: &RawConfigFile) -> Result<()> {
    let steps = &cfg.scheduler.backoff;

    for pair in steps.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next[0] <= prev[0] || next[1] < prev[1] {
            return Err(MonitordError::ConfigError(format!(
                "[scheduler].backoff steps must increase: {:?} is followed by {:?}",
                prev, next
            )));
        }
    }

    if let Some(last) = steps.last() {
        if cfg.scheduler.backoff_ceiling_secs < last[1] {
            return Err(MonitordError::ConfigError(format!(
                "[scheduler].backoff_ceiling_secs ({}) is below the last backoff step ({})",
                cfg.scheduler.backoff_ceiling_secs, last[1]
            )));
        }
    }

    Ok(())
}
