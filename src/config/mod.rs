// src/config/mod.rs

//! Configuration loading and validation for monitord.
//!
//! Responsibilities:
//! - Define the TOML-backed tuning model and the runtime options (`model.rs`).
//! - Load a tuning file from disk (`loader.rs`).
//! - Validate thresholds and the backoff table (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    MonitorConfig, MonitorOptions, OutputSection, RawConfigFile, SchedulerSection, TailerSection,
};
