//! Query semantics shared by every backend.
//!
//! Both backends must answer identically for identical inputs: the window is
//! half-open `[from, to)`, filters are exact-match equality, and `group_by =
//! "hour"` buckets by the floor of each timestamp to the start of its UTC
//! hour, omitting empty buckets. The fold helpers here are the in-process
//! implementation used by the memory backend; the SQLite backend pushes the
//! same semantics into SQL and is held to this module by parity tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VitalsError};
use crate::record::{
    is_error_status, CustomHourBucket, CustomMetricRecord, EndpointKey, EndpointStat,
    HttpHourBucket, HttpMetricRecord,
};

/// Half-open query window `[from, to)`.
///
/// An inverted window (`from >= to`) matches nothing; it is not an error. The
/// caller owns the ordering of its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Window expressed as "hours ago", the caller convention of the query
    /// surface: `from = now - from_hours`, `to = now - to_hours`.
    pub fn last_hours(now: DateTime<Utc>, from_hours: i64, to_hours: i64) -> Self {
        Self {
            from: now - chrono::Duration::hours(from_hours),
            to: now - chrono::Duration::hours(to_hours),
        }
    }

    /// Membership test. `from` is included, `to` is excluded.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts < self.to
    }
}

/// Supported grouping modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Hour,
}

impl GroupBy {
    /// Parse the optional caller-supplied `group_by` string. Anything other
    /// than absent or `"hour"` is a caller error, not a storage failure.
    pub fn parse(raw: Option<&str>) -> Result<Option<GroupBy>> {
        match raw {
            None => Ok(None),
            Some("hour") => Ok(Some(GroupBy::Hour)),
            Some(other) => Err(VitalsError::QueryValidation(format!(
                "unsupported group_by: {other} (use \"hour\")"
            ))),
        }
    }
}

/// Record kind selector used by the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Http,
    Custom,
}

impl std::str::FromStr for MetricType {
    type Err = VitalsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(MetricType::Http),
            "custom" => Ok(MetricType::Custom),
            other => Err(VitalsError::QueryValidation(format!(
                "unsupported metric_type: {other} (use \"http\" or \"custom\")"
            ))),
        }
    }
}

/// Optional exact-match filters for HTTP queries, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpFilter {
    pub endpoint: Option<String>,
    pub method: Option<String>,
}

impl HttpFilter {
    pub fn matches(&self, record: &HttpMetricRecord) -> bool {
        if let Some(ep) = &self.endpoint {
            if record.endpoint != *ep {
                return false;
            }
        }
        if let Some(m) = &self.method {
            if record.method != *m {
                return false;
            }
        }
        true
    }
}

/// HTTP query output: plain records ordered by timestamp, or sparse hour
/// buckets ordered by bucket start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HttpQueryResult {
    Records(Vec<HttpMetricRecord>),
    Buckets(Vec<HttpHourBucket>),
}

impl HttpQueryResult {
    pub fn len(&self) -> usize {
        match self {
            HttpQueryResult::Records(v) => v.len(),
            HttpQueryResult::Buckets(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Custom query output, analogous to [`HttpQueryResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomQueryResult {
    Records(Vec<CustomMetricRecord>),
    Buckets(Vec<CustomHourBucket>),
}

impl CustomQueryResult {
    pub fn len(&self) -> usize {
        match self {
            CustomQueryResult::Records(v) => v.len(),
            CustomQueryResult::Buckets(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a cleanup sweep. Failures are reported in-band because cleanup
/// is routinely invoked opportunistically and must not raise past the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub deleted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Floor a timestamp to the start of its UTC hour.
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Fold already-filtered HTTP records into sparse hour buckets, ascending by
/// bucket start.
pub fn bucket_http(records: &[HttpMetricRecord]) -> Vec<HttpHourBucket> {
    let mut acc: BTreeMap<DateTime<Utc>, (u64, f64, u64)> = BTreeMap::new();
    for r in records {
        let e = acc.entry(hour_floor(r.timestamp)).or_insert((0, 0.0, 0));
        e.0 += 1;
        e.1 += r.latency_ms;
        if is_error_status(r.status_code) {
            e.2 += 1;
        }
    }
    acc.into_iter()
        .map(|(bucket_start, (count, latency_sum, error_count))| HttpHourBucket {
            bucket_start,
            count,
            avg_latency_ms: latency_sum / count as f64,
            error_count,
        })
        .collect()
}

/// Fold already-filtered custom records into sparse hour buckets, partitioned
/// by metric name, ascending by (bucket start, name).
pub fn bucket_custom(records: &[CustomMetricRecord]) -> Vec<CustomHourBucket> {
    let mut acc: BTreeMap<(DateTime<Utc>, String), (u64, f64)> = BTreeMap::new();
    for r in records {
        let e = acc
            .entry((hour_floor(r.timestamp), r.name.clone()))
            .or_insert((0, 0.0));
        e.0 += 1;
        e.1 += r.value;
    }
    acc.into_iter()
        .map(|((bucket_start, name), (count, sum_value))| CustomHourBucket {
            bucket_start,
            name,
            count,
            sum_value,
        })
        .collect()
}

/// Fold HTTP records into per-(endpoint, method) summaries.
pub fn endpoint_stats(
    records: impl IntoIterator<Item = HttpMetricRecord>,
) -> BTreeMap<EndpointKey, EndpointStat> {
    let mut acc: BTreeMap<EndpointKey, (u64, f64, u64)> = BTreeMap::new();
    for r in records {
        let key = EndpointKey {
            endpoint: r.endpoint,
            method: r.method,
        };
        let e = acc.entry(key).or_insert((0, 0.0, 0));
        e.0 += 1;
        e.1 += r.latency_ms;
        if is_error_status(r.status_code) {
            e.2 += 1;
        }
    }
    acc.into_iter()
        .map(|(key, (count, latency_sum, error_count))| {
            (
                key,
                EndpointStat {
                    count,
                    avg_latency_ms: latency_sum / count as f64,
                    error_count,
                },
            )
        })
        .collect()
}
