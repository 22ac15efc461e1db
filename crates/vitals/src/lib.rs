//! vitals: service metrics with pluggable storage.
//!
//! Facade crate re-exporting the record/query primitives from
//! `vitals-core` and the engine stack from `vitals-engine`.

pub use vitals_core::*;

pub use vitals_engine::config;
pub use vitals_engine::storage::{MemoryStorage, SqliteStorage};
pub use vitals_engine::{open_backend, ActiveRequests, Metrics, MetricsState, StorageBackend};
