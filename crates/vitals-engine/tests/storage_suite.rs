//! Backend contract tests, run against both implementations.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use vitals_core::record::{CustomMetricRecord, EndpointKey, HttpMetricRecord, LabelValue};
use vitals_core::{CustomQueryResult, GroupBy, HttpFilter, HttpQueryResult, TimeRange};
use vitals_engine::storage::{MemoryStorage, SqliteStorage};
use vitals_engine::{open_backend, StorageBackend};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 25, h, m, s).unwrap()
}

fn http(ts: DateTime<Utc>, endpoint: &str, method: &str, status: u16, latency: f64) -> HttpMetricRecord {
    HttpMetricRecord {
        timestamp: ts,
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        status_code: status,
        latency_ms: latency,
    }
}

fn custom(ts: DateTime<Utc>, name: &str, value: f64) -> CustomMetricRecord {
    CustomMetricRecord {
        timestamp: ts,
        name: name.to_string(),
        value,
        labels: None,
    }
}

async fn memory() -> Arc<dyn StorageBackend> {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    storage.initialize().await.unwrap();
    storage
}

async fn sqlite(dir: &tempfile::TempDir) -> Arc<dyn StorageBackend> {
    let path = dir.path().join("metrics.db");
    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteStorage::new(path));
    storage.initialize().await.unwrap();
    storage
}

// ---- half-open window ----

async fn half_open_window(storage: Arc<dyn StorageBackend>) {
    let from = at(10, 0, 0);
    let to = at(11, 0, 0);
    storage.store_http_metric(http(from, "/a", "GET", 200, 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 30, 0), "/a", "GET", 200, 1.0)).await.unwrap();
    storage.store_http_metric(http(to, "/a", "GET", 200, 1.0)).await.unwrap();

    let result = storage
        .query_http_metrics(TimeRange::new(from, to), HttpFilter::default(), None)
        .await
        .unwrap();
    let HttpQueryResult::Records(records) = result else {
        panic!("expected records")
    };
    assert_eq!(records.len(), 2, "from included, to excluded");
    assert_eq!(records[0].timestamp, from);
    assert_eq!(records[1].timestamp, at(10, 30, 0));
}

#[tokio::test]
async fn half_open_window_memory() {
    half_open_window(memory().await).await;
}

#[tokio::test]
async fn half_open_window_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    half_open_window(sqlite(&dir).await).await;
}

// ---- ordering ----

async fn orders_by_timestamp(storage: Arc<dyn StorageBackend>) {
    // insert out of timestamp order
    storage.store_http_metric(http(at(10, 40, 0), "/a", "GET", 200, 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 10, 0), "/a", "GET", 200, 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 25, 0), "/a", "GET", 200, 1.0)).await.unwrap();

    let result = storage
        .query_http_metrics(
            TimeRange::new(at(10, 0, 0), at(11, 0, 0)),
            HttpFilter::default(),
            None,
        )
        .await
        .unwrap();
    let HttpQueryResult::Records(records) = result else {
        panic!("expected records")
    };
    let stamps: Vec<_> = records.iter().map(|r| r.timestamp).collect();
    assert_eq!(stamps, vec![at(10, 10, 0), at(10, 25, 0), at(10, 40, 0)]);
}

#[tokio::test]
async fn orders_by_timestamp_memory() {
    orders_by_timestamp(memory().await).await;
}

#[tokio::test]
async fn orders_by_timestamp_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    orders_by_timestamp(sqlite(&dir).await).await;
}

// ---- filters ----

async fn conjunctive_filters(storage: Arc<dyn StorageBackend>) {
    storage.store_http_metric(http(at(10, 0, 0), "/users", "GET", 200, 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 1, 0), "/users", "POST", 201, 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 2, 0), "/orders", "GET", 200, 1.0)).await.unwrap();

    let range = TimeRange::new(at(10, 0, 0), at(11, 0, 0));

    let both = storage
        .query_http_metrics(
            range,
            HttpFilter {
                endpoint: Some("/users".into()),
                method: Some("GET".into()),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(both.len(), 1);

    let endpoint_only = storage
        .query_http_metrics(
            range,
            HttpFilter {
                endpoint: Some("/users".into()),
                method: None,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(endpoint_only.len(), 2);

    let none = storage
        .query_http_metrics(range, HttpFilter::default(), None)
        .await
        .unwrap();
    assert_eq!(none.len(), 3);
}

#[tokio::test]
async fn conjunctive_filters_memory() {
    conjunctive_filters(memory().await).await;
}

#[tokio::test]
async fn conjunctive_filters_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    conjunctive_filters(sqlite(&dir).await).await;
}

async fn custom_name_filter(storage: Arc<dyn StorageBackend>) {
    storage.store_custom_metric(custom(at(10, 0, 0), "revenue", 9.0)).await.unwrap();
    storage.store_custom_metric(custom(at(10, 1, 0), "signups", 1.0)).await.unwrap();

    let result = storage
        .query_custom_metrics(
            TimeRange::new(at(10, 0, 0), at(11, 0, 0)),
            Some("revenue".into()),
            None,
        )
        .await
        .unwrap();
    let CustomQueryResult::Records(records) = result else {
        panic!("expected records")
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "revenue");
}

#[tokio::test]
async fn custom_name_filter_memory() {
    custom_name_filter(memory().await).await;
}

#[tokio::test]
async fn custom_name_filter_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    custom_name_filter(sqlite(&dir).await).await;
}

// ---- grouping ----

async fn hour_grouping(storage: Arc<dyn StorageBackend>) {
    storage.store_http_metric(http(at(10, 5, 0), "/a", "GET", 200, 10.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 45, 0), "/a", "GET", 502, 30.0)).await.unwrap();
    storage.store_http_metric(http(at(11, 10, 0), "/a", "GET", 200, 8.0)).await.unwrap();

    let result = storage
        .query_http_metrics(
            TimeRange::new(at(10, 0, 0), at(12, 0, 0)),
            HttpFilter::default(),
            Some(GroupBy::Hour),
        )
        .await
        .unwrap();
    let HttpQueryResult::Buckets(buckets) = result else {
        panic!("expected buckets")
    };
    assert_eq!(buckets.len(), 2);

    assert_eq!(buckets[0].bucket_start, at(10, 0, 0));
    assert_eq!(buckets[0].count, 2);
    assert!((buckets[0].avg_latency_ms - 20.0).abs() < 1e-9);
    assert_eq!(buckets[0].error_count, 1);

    assert_eq!(buckets[1].bucket_start, at(11, 0, 0));
    assert_eq!(buckets[1].count, 1);
    assert_eq!(buckets[1].error_count, 0);
}

#[tokio::test]
async fn hour_grouping_memory() {
    hour_grouping(memory().await).await;
}

#[tokio::test]
async fn hour_grouping_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    hour_grouping(sqlite(&dir).await).await;
}

async fn custom_grouping_partitions_by_name(storage: Arc<dyn StorageBackend>) {
    storage.store_custom_metric(custom(at(10, 5, 0), "revenue", 10.0)).await.unwrap();
    storage.store_custom_metric(custom(at(10, 40, 0), "revenue", 5.0)).await.unwrap();
    storage.store_custom_metric(custom(at(10, 50, 0), "signups", 1.0)).await.unwrap();

    let result = storage
        .query_custom_metrics(
            TimeRange::new(at(10, 0, 0), at(11, 0, 0)),
            None,
            Some(GroupBy::Hour),
        )
        .await
        .unwrap();
    let CustomQueryResult::Buckets(buckets) = result else {
        panic!("expected buckets")
    };
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].name, "revenue");
    assert_eq!(buckets[0].count, 2);
    assert!((buckets[0].sum_value - 15.0).abs() < 1e-9);
    assert_eq!(buckets[1].name, "signups");
    assert_eq!(buckets[1].count, 1);
}

#[tokio::test]
async fn custom_grouping_partitions_by_name_memory() {
    custom_grouping_partitions_by_name(memory().await).await;
}

#[tokio::test]
async fn custom_grouping_partitions_by_name_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    custom_grouping_partitions_by_name(sqlite(&dir).await).await;
}

// ---- cleanup ----

async fn cleanup_is_idempotent(storage: Arc<dyn StorageBackend>) {
    storage.store_http_metric(http(at(8, 0, 0), "/a", "GET", 200, 1.0)).await.unwrap();
    storage.store_custom_metric(custom(at(8, 30, 0), "revenue", 1.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 0, 0), "/a", "GET", 200, 1.0)).await.unwrap();

    let cutoff = at(9, 0, 0);
    assert_eq!(storage.cleanup_old_data(cutoff).await.unwrap(), 2);
    assert_eq!(
        storage.cleanup_old_data(cutoff).await.unwrap(),
        0,
        "second sweep with the same cutoff deletes nothing"
    );
    // earlier cutoff also deletes nothing
    assert_eq!(storage.cleanup_old_data(at(8, 0, 0)).await.unwrap(), 0);

    // record exactly at the cutoff survives (delete is strictly `< before`)
    storage.store_http_metric(http(cutoff, "/a", "GET", 200, 1.0)).await.unwrap();
    assert_eq!(storage.cleanup_old_data(cutoff).await.unwrap(), 0);

    let remaining = storage
        .query_http_metrics(
            TimeRange::new(at(0, 0, 0), at(23, 0, 0)),
            HttpFilter::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn cleanup_is_idempotent_memory() {
    cleanup_is_idempotent(memory().await).await;
}

#[tokio::test]
async fn cleanup_is_idempotent_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    cleanup_is_idempotent(sqlite(&dir).await).await;
}

// ---- endpoint stats ----

async fn endpoint_stats_summary(storage: Arc<dyn StorageBackend>) {
    storage.store_http_metric(http(at(10, 0, 0), "/a", "GET", 200, 10.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 1, 0), "/a", "GET", 500, 20.0)).await.unwrap();
    storage.store_http_metric(http(at(10, 2, 0), "/a", "POST", 201, 5.0)).await.unwrap();

    let stats = storage.endpoint_stats().await.unwrap();
    assert_eq!(stats.len(), 2);

    let a_get = &stats[&EndpointKey {
        endpoint: "/a".into(),
        method: "GET".into(),
    }];
    assert_eq!(a_get.count, 2);
    assert!((a_get.avg_latency_ms - 15.0).abs() < 1e-9);
    assert_eq!(a_get.error_count, 1);
}

#[tokio::test]
async fn endpoint_stats_summary_memory() {
    endpoint_stats_summary(memory().await).await;
}

#[tokio::test]
async fn endpoint_stats_summary_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    endpoint_stats_summary(sqlite(&dir).await).await;
}

// ---- labels ----

async fn labels_survive_storage(storage: Arc<dyn StorageBackend>) {
    let mut labels: BTreeMap<String, LabelValue> = BTreeMap::new();
    labels.insert("user_id".into(), 123.into());
    labels.insert("plan".into(), "pro".into());
    labels.insert("beta".into(), true.into());

    storage
        .store_custom_metric(CustomMetricRecord {
            timestamp: at(10, 0, 0),
            name: "revenue".into(),
            value: 99.99,
            labels: Some(labels.clone()),
        })
        .await
        .unwrap();

    let result = storage
        .query_custom_metrics(
            TimeRange::new(at(9, 0, 0), at(11, 0, 0)),
            Some("revenue".into()),
            None,
        )
        .await
        .unwrap();
    let CustomQueryResult::Records(records) = result else {
        panic!("expected records")
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, 99.99);
    assert_eq!(records[0].labels.as_ref().unwrap(), &labels);
}

#[tokio::test]
async fn labels_survive_storage_memory() {
    labels_survive_storage(memory().await).await;
}

#[tokio::test]
async fn labels_survive_storage_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    labels_survive_storage(sqlite(&dir).await).await;
}

// ---- lifecycle ----

async fn closed_backend_rejects_operations(storage: Arc<dyn StorageBackend>) {
    storage.close().await.unwrap();
    storage.close().await.unwrap(); // idempotent

    let err = storage
        .store_http_metric(http(at(10, 0, 0), "/a", "GET", 200, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "STORAGE_CLOSED");

    let err = storage
        .query_http_metrics(
            TimeRange::new(at(10, 0, 0), at(11, 0, 0)),
            HttpFilter::default(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "STORAGE_CLOSED");
}

#[tokio::test]
async fn closed_backend_rejects_operations_memory() {
    closed_backend_rejects_operations(memory().await).await;
}

#[tokio::test]
async fn closed_backend_rejects_operations_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    closed_backend_rejects_operations(sqlite(&dir).await).await;
}

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.db");

    let first: Arc<dyn StorageBackend> = Arc::new(SqliteStorage::new(&path));
    first.initialize().await.unwrap();
    first.store_http_metric(http(at(10, 0, 0), "/a", "GET", 200, 1.0)).await.unwrap();
    first.close().await.unwrap();

    // second lifetime against the same file; schema migration must be safe
    let second: Arc<dyn StorageBackend> = Arc::new(SqliteStorage::new(&path));
    second.initialize().await.unwrap();
    let result = second
        .query_http_metrics(
            TimeRange::new(at(9, 0, 0), at(11, 0, 0)),
            HttpFilter::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn sqlite_unwritable_path_fails_init() {
    let storage = SqliteStorage::new("/nonexistent-dir/metrics.db");
    let err = storage.initialize().await.unwrap_err();
    assert_eq!(err.code().as_str(), "STORAGE_INIT");
}

#[tokio::test]
async fn unknown_scheme_is_a_configuration_error() {
    let err = open_backend("redis://localhost").unwrap_err();
    assert_eq!(err.code().as_str(), "CONFIGURATION");

    assert!(open_backend("memory://").is_ok());
}
