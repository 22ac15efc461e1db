//! Immutable record shapes stored by the backends and the derived aggregate
//! shapes returned from queries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed HTTP request, created exactly once per completed request by
/// the interceptor. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpMetricRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
}

/// One explicitly tracked business observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetricRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, LabelValue>>,
}

/// Scalar label value. The engine stores and returns labels unchanged and
/// never branches on their content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for LabelValue {
    fn from(v: bool) -> Self {
        LabelValue::Bool(v)
    }
}

impl From<i64> for LabelValue {
    fn from(v: i64) -> Self {
        LabelValue::Int(v)
    }
}

impl From<i32> for LabelValue {
    fn from(v: i32) -> Self {
        LabelValue::Int(i64::from(v))
    }
}

impl From<f64> for LabelValue {
    fn from(v: f64) -> Self {
        LabelValue::Float(v)
    }
}

impl From<&str> for LabelValue {
    fn from(v: &str) -> Self {
        LabelValue::Str(v.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(v: String) -> Self {
        LabelValue::Str(v)
    }
}

/// Key for per-endpoint aggregation: one row per (endpoint, method) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub endpoint: String,
    pub method: String,
}

/// Per-endpoint summary over the retained window. Derived on demand, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStat {
    pub count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
}

/// Hour-aligned aggregate of HTTP records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpHourBucket {
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
}

/// Hour-aligned aggregate of custom records, partitioned by metric name so
/// unrelated metrics are never summed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomHourBucket {
    pub bucket_start: DateTime<Utc>,
    pub name: String,
    pub count: u64,
    pub sum_value: f64,
}

/// Whether a status code counts toward `error_count`. Client errors (4xx) are
/// deliberate responses; only server-side failures are counted.
pub fn is_error_status(status_code: u16) -> bool {
    status_code >= 500
}
