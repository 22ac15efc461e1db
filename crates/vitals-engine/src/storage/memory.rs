//! In-memory backend: append-only buffers with linear-scan queries.
//!
//! All data is lost on process termination; this is a documented limitation,
//! not a bug. Intended for development and single-process deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vitals_core::error::{Result, VitalsError};
use vitals_core::query::{
    bucket_custom, bucket_http, endpoint_stats, CustomQueryResult, GroupBy, HttpFilter,
    HttpQueryResult, TimeRange,
};
use vitals_core::record::{CustomMetricRecord, EndpointKey, EndpointStat, HttpMetricRecord};

use super::StorageBackend;

#[derive(Default)]
struct Buffers {
    http: Vec<HttpMetricRecord>,
    custom: Vec<CustomMetricRecord>,
}

/// Volatile process-lifetime storage. A single mutex guards both buffers so
/// concurrent writers never corrupt state and a reader never observes a
/// partially-appended record. The lock is held only across the push or scan,
/// never across an await point.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Buffers>,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VitalsError::StorageClosed);
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Buffers>> {
        self.inner
            .lock()
            .map_err(|_| VitalsError::Internal("metrics buffer lock poisoned".into()))
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        // Idempotent: first close drops the buffers, later closes are no-ops.
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut buf = self.lock()?;
            buf.http = Vec::new();
            buf.custom = Vec::new();
        }
        Ok(())
    }

    async fn store_http_metric(&self, record: HttpMetricRecord) -> Result<()> {
        self.ensure_open()?;
        self.lock()?.http.push(record);
        Ok(())
    }

    async fn store_custom_metric(&self, record: CustomMetricRecord) -> Result<()> {
        self.ensure_open()?;
        self.lock()?.custom.push(record);
        Ok(())
    }

    async fn query_http_metrics(
        &self,
        range: TimeRange,
        filter: HttpFilter,
        group_by: Option<GroupBy>,
    ) -> Result<HttpQueryResult> {
        self.ensure_open()?;
        let mut matched: Vec<HttpMetricRecord> = {
            let buf = self.lock()?;
            buf.http
                .iter()
                .filter(|r| range.contains(r.timestamp) && filter.matches(r))
                .cloned()
                .collect()
        };
        // Insertion order may not equal timestamp order under concurrent
        // writers.
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(match group_by {
            None => HttpQueryResult::Records(matched),
            Some(GroupBy::Hour) => HttpQueryResult::Buckets(bucket_http(&matched)),
        })
    }

    async fn query_custom_metrics(
        &self,
        range: TimeRange,
        name: Option<String>,
        group_by: Option<GroupBy>,
    ) -> Result<CustomQueryResult> {
        self.ensure_open()?;
        let mut matched: Vec<CustomMetricRecord> = {
            let buf = self.lock()?;
            buf.custom
                .iter()
                .filter(|r| {
                    range.contains(r.timestamp)
                        && name.as_ref().map(|n| r.name == *n).unwrap_or(true)
                })
                .cloned()
                .collect()
        };
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(match group_by {
            None => CustomQueryResult::Records(matched),
            Some(GroupBy::Hour) => CustomQueryResult::Buckets(bucket_custom(&matched)),
        })
    }

    async fn endpoint_stats(&self) -> Result<BTreeMap<EndpointKey, EndpointStat>> {
        self.ensure_open()?;
        let records: Vec<HttpMetricRecord> = self.lock()?.http.clone();
        Ok(endpoint_stats(records))
    }

    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> Result<u64> {
        self.ensure_open()?;
        let mut buf = self.lock()?;
        let before_http = buf.http.len();
        let before_custom = buf.custom.len();
        buf.http.retain(|r| r.timestamp >= before);
        buf.custom.retain(|r| r.timestamp >= before);
        let deleted = (before_http - buf.http.len()) + (before_custom - buf.custom.len());
        Ok(deleted as u64)
    }
}
