//! Core domain types for the getl ETL engine.
//!
//! This crate provides the foundational types shared by every pipeline
//! stage:
//!
//! - [`Value`] / [`Row`] — the closed, vendor-agnostic row representation
//! - [`NormalizedType`] / [`Vendor`] — the type-interchange vocabulary
//!   consumed by the type mapper, schema synchronizer, and loader
//! - [`Job`] / [`Transformation`] / [`IncrementalSync`] — the declarative
//!   unit of work loaded from a job descriptor file
//! - [`GetlError`] — the closed error taxonomy returned by every component
//!
//! Downstream crates (`getl-extractor`, `getl-loader`, `getl-type-mapper`,
//! ...) depend on this crate for the vocabulary they operate on; they never
//! depend on each other directly.

pub mod error;
pub mod job;
pub mod types;
pub mod value;

pub use error::GetlError;
pub use job::{
    IncrementalStrategy, IncrementalSync, Job, JobConfig, Join, Transformation,
};
pub use types::{ColumnTypeMap, NormalizedType, Vendor};
pub use value::{Row, Value};
