//! Library surface for the getl ETL synchronization engine's CLI binary.
//!
//! This crate wires together the eleven component crates
//! (`getl-type-mapper` through `getl-scheduler`) into the run loop a job
//! descriptor drives. The binary (`src/main.rs`) is a thin clap front end
//! over [`pipeline::run_job`] and [`getl_scheduler::start`].

pub mod pipeline;

pub use pipeline::{JobLocks, RunError, RunOutcome, RunState};
