//! Request interceptor: latency measurement, active-request gauge, and the
//! record-forward step.
//!
//! The entry/exit pairing is a single scoped-acquisition guard whose `Drop`
//! performs the decrement and the record-forward. Success, handled error
//! responses, and cancelled/aborted requests all exit through that one path,
//! so the gauge can never leak and exactly one record is stored per request.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::{extract::Request, extract::State, middleware::Next, response::Response, Router};
use chrono::Utc;
use tokio::time::Instant;

use vitals_core::record::HttpMetricRecord;

use crate::storage::StorageBackend;

/// Live count of requests currently being handled.
///
/// Dependency-injected, never ambient global state, so multiple engine
/// instances in one process (tests) do not interfere. Snapshot reads never
/// block writers.
#[derive(Debug, Default)]
pub struct ActiveRequests(AtomicI64);

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Non-blocking snapshot of the in-flight count.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// State injected into the middleware: the active backend plus the gauge.
#[derive(Clone)]
pub struct MetricsState {
    pub storage: Arc<dyn StorageBackend>,
    pub active: Arc<ActiveRequests>,
}

/// Status recorded when the handler never produced a response (cancellation,
/// abort mid-flight).
const FALLBACK_STATUS: u16 = 500;

struct RequestGuard {
    state: MetricsState,
    endpoint: String,
    method: String,
    entered_at: chrono::DateTime<Utc>,
    start: Instant,
    status: Option<u16>,
}

impl RequestGuard {
    fn enter(state: MetricsState, endpoint: String, method: String) -> Self {
        state.active.inc();
        Self {
            state,
            endpoint,
            method,
            entered_at: Utc::now(),
            start: Instant::now(),
            status: None,
        }
    }

    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.state.active.dec();

        let record = HttpMetricRecord {
            timestamp: self.entered_at,
            endpoint: std::mem::take(&mut self.endpoint),
            method: std::mem::take(&mut self.method),
            status_code: self.status.unwrap_or(FALLBACK_STATUS),
            latency_ms: self.start.elapsed().as_secs_f64() * 1000.0,
        };

        // Record-forward runs off the request path; a failed write is logged
        // and dropped, never surfaced to the request being measured. Drop may
        // run during runtime teardown, where spawning is impossible.
        let storage = Arc::clone(&self.state.storage);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = storage.store_http_metric(record).await {
                        tracing::warn!(error = %e, "dropping http metric write");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("dropping http metric write: runtime unavailable");
            }
        }
    }
}

/// Middleware function wrapping every inbound request exactly once.
pub async fn track_requests(State(state): State<MetricsState>, req: Request, next: Next) -> Response {
    let endpoint = req.uri().path().to_string();
    let method = req.method().to_string();

    let mut guard = RequestGuard::enter(state, endpoint, method);
    let response = next.run(req).await;
    guard.set_status(response.status().as_u16());
    // guard drops here: decrement + record-forward, exactly once. If the
    // future is dropped before `next` completes, the same drop path runs with
    // the fallback status.
    response
}

/// Attach the interceptor to a router so it wraps every inbound request.
pub fn instrument(router: Router, state: MetricsState) -> Router {
    router.layer(axum::middleware::from_fn_with_state(state, track_requests))
}
