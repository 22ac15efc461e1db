//! Engine facade: the object the host constructs at startup.
//!
//! Owns the selected backend, the active-request gauge, and the retention
//! sweep. The host calls `initialize()` once at startup, attaches the
//! interceptor via [`Metrics::instrument`], and calls `close()` at shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use vitals_core::error::Result;
use vitals_core::query::{
    CleanupOutcome, CustomQueryResult, GroupBy, HttpFilter, HttpQueryResult, TimeRange,
};
use vitals_core::record::{CustomMetricRecord, EndpointKey, EndpointStat, LabelValue};

use crate::config::MetricsSection;
use crate::interceptor::{self, ActiveRequests, MetricsState};
use crate::storage::{open_backend, StorageBackend};

#[derive(Debug)]
pub struct Metrics {
    cfg: MetricsSection,
    storage: Arc<dyn StorageBackend>,
    active: Arc<ActiveRequests>,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Metrics {
    /// Build the engine from config. Fails with `Configuration` on an
    /// unknown storage scheme, before any request is served.
    pub fn new(cfg: MetricsSection) -> Result<Self> {
        let storage = open_backend(&cfg.storage)?;
        Ok(Self {
            cfg,
            storage,
            active: Arc::new(ActiveRequests::new()),
            cleanup_task: std::sync::Mutex::new(None),
        })
    }

    /// Prepare the backend and, when enabled, start the periodic retention
    /// sweep. Called once at host startup.
    pub async fn initialize(&self) -> Result<()> {
        self.storage.initialize().await?;

        if self.cfg.enable_cleanup {
            let storage = Arc::clone(&self.storage);
            let retention = chrono::Duration::hours(i64::from(self.cfg.retention_hours));
            let every = std::time::Duration::from_secs(self.cfg.cleanup_interval_secs);

            let handle = tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick fires immediately; skip it so startup does
                // not race the host's own warm-up traffic.
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let before = Utc::now() - retention;
                    match storage.cleanup_old_data(before).await {
                        Ok(deleted) => {
                            tracing::info!(deleted, %before, "retention sweep done");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "retention sweep failed");
                        }
                    }
                }
            });
            if let Ok(mut slot) = self.cleanup_task.lock() {
                // A repeated initialize must not leak the previous sweep.
                if let Some(old) = slot.replace(handle) {
                    old.abort();
                }
            }
        }

        tracing::info!(storage = %self.cfg.storage, "metrics engine initialized");
        Ok(())
    }

    /// Stop the retention sweep and release the backend. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if let Ok(mut slot) = self.cleanup_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.storage.close().await?;
        tracing::info!("metrics engine closed");
        Ok(())
    }

    /// Track a custom business metric, stamped with the current UTC instant.
    pub async fn track(
        &self,
        name: &str,
        value: f64,
        labels: Option<BTreeMap<String, LabelValue>>,
    ) -> Result<()> {
        self.storage
            .store_custom_metric(CustomMetricRecord {
                timestamp: Utc::now(),
                name: name.to_string(),
                value,
                labels,
            })
            .await
    }

    pub async fn query_http(
        &self,
        range: TimeRange,
        filter: HttpFilter,
        group_by: Option<GroupBy>,
    ) -> Result<HttpQueryResult> {
        self.storage.query_http_metrics(range, filter, group_by).await
    }

    pub async fn query_custom(
        &self,
        range: TimeRange,
        name: Option<String>,
        group_by: Option<GroupBy>,
    ) -> Result<CustomQueryResult> {
        self.storage.query_custom_metrics(range, name, group_by).await
    }

    pub async fn endpoint_stats(&self) -> Result<BTreeMap<EndpointKey, EndpointStat>> {
        self.storage.endpoint_stats().await
    }

    /// Opportunistic cleanup. Failures come back in-band with a zero count
    /// rather than raising past the calling boundary.
    pub async fn cleanup_before(&self, before: DateTime<Utc>) -> CleanupOutcome {
        match self.storage.cleanup_old_data(before).await {
            Ok(deleted) => CleanupOutcome {
                deleted,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "cleanup failed");
                CleanupOutcome {
                    deleted: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Snapshot of the in-flight request count.
    pub fn active_requests(&self) -> i64 {
        self.active.get()
    }

    /// Whether the retention sweep task is currently running.
    pub fn sweep_running(&self) -> bool {
        match self.cleanup_task.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    /// State handle for attaching the interceptor manually.
    pub fn state(&self) -> MetricsState {
        MetricsState {
            storage: Arc::clone(&self.storage),
            active: Arc::clone(&self.active),
        }
    }

    /// Wrap every route of `router` with the request interceptor.
    pub fn instrument(&self, router: Router) -> Router {
        interceptor::instrument(router, self.state())
    }
}
