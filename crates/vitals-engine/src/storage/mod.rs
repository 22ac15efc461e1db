//! Storage backend contract and backend selection.
//!
//! Every backend implements the same capability set; the interceptor and the
//! query surface are backend-agnostic. Swapping backends must not change
//! observable query results for identical inputs (see the parity tests).

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vitals_core::error::{Result, VitalsError};
use vitals_core::query::{CustomQueryResult, GroupBy, HttpFilter, HttpQueryResult, TimeRange};
use vitals_core::record::{CustomMetricRecord, EndpointKey, EndpointStat, HttpMetricRecord};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StorageBackend")
    }
}

/// Capability set implemented by every backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare underlying storage (allocate buffers / open file, create
    /// schema if absent). Safe to call once per backend lifetime; fails with
    /// `StorageInit` if the target resource is unreachable or unwritable.
    async fn initialize(&self) -> Result<()>;

    /// Release resources. Idempotent; subsequent operations fail with
    /// `StorageClosed`.
    async fn close(&self) -> Result<()>;

    /// Durably append one HTTP record. Returns once the write is acknowledged
    /// and visible to subsequent reads on this process.
    async fn store_http_metric(&self, record: HttpMetricRecord) -> Result<()>;

    /// Durably append one custom record.
    async fn store_custom_metric(&self, record: CustomMetricRecord) -> Result<()>;

    /// Records in `[range.from, range.to)` matching the filter, ordered by
    /// timestamp; or sparse hour buckets when grouping is requested.
    async fn query_http_metrics(
        &self,
        range: TimeRange,
        filter: HttpFilter,
        group_by: Option<GroupBy>,
    ) -> Result<HttpQueryResult>;

    /// Custom-record analogue of [`query_http_metrics`]; the optional name
    /// filter is exact-match.
    async fn query_custom_metrics(
        &self,
        range: TimeRange,
        name: Option<String>,
        group_by: Option<GroupBy>,
    ) -> Result<CustomQueryResult>;

    /// Per-(endpoint, method) summaries over all retained HTTP records.
    async fn endpoint_stats(&self) -> Result<BTreeMap<EndpointKey, EndpointStat>>;

    /// Delete all records (both kinds) with `timestamp < before`; returns the
    /// number deleted. Idempotent for the same or earlier cutoff.
    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> Result<u64>;
}

const MEMORY_SCHEME: &str = "memory://";
const SQLITE_SCHEME: &str = "sqlite://";

/// Construct a backend from its descriptor string: `memory://` or
/// `sqlite://<path>`. An unrecognized scheme is a configuration error raised
/// here, before any request is served.
pub fn open_backend(descriptor: &str) -> Result<Arc<dyn StorageBackend>> {
    if descriptor.starts_with(MEMORY_SCHEME) {
        Ok(Arc::new(MemoryStorage::new()))
    } else if let Some(path) = descriptor.strip_prefix(SQLITE_SCHEME) {
        if path.is_empty() {
            return Err(VitalsError::Configuration(
                "sqlite:// descriptor requires a file path".into(),
            ));
        }
        Ok(Arc::new(SqliteStorage::new(path)))
    } else {
        Err(VitalsError::Configuration(format!(
            "unknown storage backend: {descriptor}"
        )))
    }
}

/// Descriptor check used by config validation; same rules as
/// [`open_backend`] without constructing anything.
pub fn validate_descriptor(descriptor: &str) -> Result<()> {
    if descriptor.starts_with(MEMORY_SCHEME) {
        Ok(())
    } else if let Some(path) = descriptor.strip_prefix(SQLITE_SCHEME) {
        if path.is_empty() {
            Err(VitalsError::Configuration(
                "sqlite:// descriptor requires a file path".into(),
            ))
        } else {
            Ok(())
        }
    } else {
        Err(VitalsError::Configuration(format!(
            "unknown storage backend: {descriptor}"
        )))
    }
}
