// src/job/mod.rs

//! Per-attempt job records and the files a job leaves behind.

pub mod instance;
pub mod kickstart;
pub mod state;
pub mod submit_file;

pub use instance::{JobInstance, MonitoringRecord};
pub use kickstart::{IntegrityMetric, Invocation, KickstartRecord, OutputFile};
pub use state::{JobState, raw_to_regular, regular_to_raw};
pub use submit_file::SubmitInfo;
