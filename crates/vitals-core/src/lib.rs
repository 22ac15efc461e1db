//! vitals core: record shapes, error surface, and query semantics.
//!
//! This crate defines the value types and the window/filter/bucket contract
//! shared by every storage backend. It intentionally carries no runtime or
//! storage dependencies so the same semantics can be reused in-process (the
//! memory backend, parity tests) and as the reference for SQL translation.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `VitalsError`/`Result` so a metrics
//! layer never crashes the service it is measuring.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod query;
pub mod record;

/// Shared result type.
pub use error::{Result, VitalsError};
pub use query::{
    CleanupOutcome, CustomQueryResult, GroupBy, HttpFilter, HttpQueryResult, MetricType, TimeRange,
};
pub use record::{
    is_error_status, CustomHourBucket, CustomMetricRecord, EndpointKey, EndpointStat,
    HttpHourBucket, HttpMetricRecord, LabelValue,
};
