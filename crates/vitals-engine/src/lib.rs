//! vitals engine: storage backends, request interceptor, and lifecycle.
//!
//! This crate wires the storage contract, the concrete backends (in-memory
//! and SQLite), the axum request interceptor, and the retention sweep into a
//! cohesive instrumentation stack. It is intended to be consumed by the host
//! service at startup and by integration tests.

pub mod config;
pub mod engine;
pub mod interceptor;
pub mod storage;

pub use engine::Metrics;
pub use interceptor::{ActiveRequests, MetricsState};
pub use storage::{open_backend, StorageBackend};

pub use vitals_core::{Result, VitalsError};
