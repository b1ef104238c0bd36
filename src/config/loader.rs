// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{MonitorConfig, RawConfigFile};
use crate::errors::Result;

/// Load a tuning file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// the semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a tuning file from path and run validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<MonitorConfig> {
    let raw_config = load_from_path(&path)?;
    let config = MonitorConfig::try_from(raw_config)?;
    Ok(config)
}

/// Defaults when no `--conf` was given, otherwise the validated file.
pub fn load_or_default(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => load_and_validate(path),
        None => Ok(MonitorConfig::default()),
    }
}
