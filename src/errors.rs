// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitordError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Workflow manifest error: {0}")]
    ManifestError(String),

    #[error("another monitord instance (pid {pid}) is already tracking this workflow")]
    AlreadyRunning { pid: i32 },

    #[error("Event sink error: {0}")]
    SinkError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON encoding error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitordError {
    /// Process exit status for this error when it escapes `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitordError::AlreadyRunning { .. } => crate::types::EXIT_ALREADY_RUNNING,
            _ => crate::types::EXIT_FAILURE,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, MonitordError>;
