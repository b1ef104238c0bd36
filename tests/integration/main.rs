// tests/integration/main.rs

#[path = "../common/mod.rs"]
mod common;

mod held_release;
mod ordering;
mod resume;
mod runtime;
mod startup;
mod subworkflow;
mod truncation;
