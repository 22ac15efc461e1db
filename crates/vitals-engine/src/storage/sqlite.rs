//! SQLite-backed persistent storage with WAL mode.
//!
//! Survives process restarts and supports multiple service instances pointed
//! at the same file: cross-process writes serialize at the SQLite level, and
//! the connection mutex here only serializes this process's own use of its
//! connection. One explicit transaction per logical write keeps the atomicity
//! boundary at a single record. Grouping and endpoint summaries are pushed
//! into SQL rather than done in-process.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text (microsecond
//! precision, `Z` suffix) so lexicographic range comparison matches
//! chronological order and SQLite's date functions can bucket them directly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ToSql};
use tokio::sync::Mutex;

use vitals_core::error::{Result, VitalsError};
use vitals_core::query::{CustomQueryResult, GroupBy, HttpFilter, HttpQueryResult, TimeRange};
use vitals_core::record::{
    CustomHourBucket, CustomMetricRecord, EndpointKey, EndpointStat, HttpHourBucket,
    HttpMetricRecord, LabelValue,
};

use super::StorageBackend;

const SCHEMA_VERSION: u32 = 1;

enum ConnState {
    Unopened,
    Open(Connection),
    Closed,
}

/// Durable file-backed store with indexed schema.
pub struct SqliteStorage {
    path: PathBuf,
    conn: Mutex<ConnState>,
}

impl SqliteStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(ConnState::Unopened),
        }
    }

    fn open_and_migrate(path: &PathBuf) -> Result<Connection> {
        let conn = Connection::open(path).map_err(|e| {
            VitalsError::StorageInit(format!("failed to open sqlite file {path:?}: {e}"))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=memory;",
        )
        .map_err(|e| VitalsError::StorageInit(format!("failed to configure sqlite: {e}")))?;

        // Idempotent schema migration; safe against an existing file.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS http_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                latency_ms REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_http_timestamp
                ON http_metrics(timestamp);
            CREATE INDEX IF NOT EXISTS idx_http_endpoint_method
                ON http_metrics(endpoint, method);
            CREATE TABLE IF NOT EXISTS custom_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                labels TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_custom_timestamp
                ON custom_metrics(timestamp);
            CREATE INDEX IF NOT EXISTS idx_custom_name
                ON custom_metrics(name);",
        )
        .map_err(|e| VitalsError::StorageInit(format!("failed to create schema: {e}")))?;

        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| VitalsError::StorageInit(format!("failed to record schema version: {e}")))?;

        Ok(conn)
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| VitalsError::Internal(format!("bad timestamp in store: {e}")))
}

fn encode_labels(labels: &Option<BTreeMap<String, LabelValue>>) -> Result<Option<String>> {
    match labels {
        None => Ok(None),
        Some(map) => serde_json::to_string(map)
            .map(Some)
            .map_err(|e| VitalsError::StorageWrite(format!("labels not serializable: {e}"))),
    }
}

fn decode_labels(raw: Option<String>) -> Result<Option<BTreeMap<String, LabelValue>>> {
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| VitalsError::Internal(format!("bad labels in store: {e}"))),
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.conn.lock().await;
        match &*state {
            ConnState::Open(_) => Ok(()),
            ConnState::Closed => Err(VitalsError::StorageClosed),
            ConnState::Unopened => {
                let conn = Self::open_and_migrate(&self.path)?;
                tracing::info!(path = %self.path.display(), "sqlite metrics store ready");
                *state = ConnState::Open(conn);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.conn.lock().await;
        if let ConnState::Open(_) = &*state {
            tracing::info!(path = %self.path.display(), "sqlite metrics store closed");
        }
        *state = ConnState::Closed;
        Ok(())
    }

    async fn store_http_metric(&self, record: HttpMetricRecord) -> Result<()> {
        let mut state = self.conn.lock().await;
        let conn = open_conn_mut(&mut *state)?;
        let tx = conn
            .transaction()
            .map_err(|e| VitalsError::StorageWrite(format!("begin failed: {e}")))?;
        tx.execute(
            "INSERT INTO http_metrics (timestamp, endpoint, method, status_code, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                encode_ts(record.timestamp),
                record.endpoint,
                record.method,
                record.status_code,
                record.latency_ms,
            ],
        )
        .map_err(|e| VitalsError::StorageWrite(format!("insert http metric failed: {e}")))?;
        tx.commit()
            .map_err(|e| VitalsError::StorageWrite(format!("commit failed: {e}")))
    }

    async fn store_custom_metric(&self, record: CustomMetricRecord) -> Result<()> {
        let labels = encode_labels(&record.labels)?;
        let mut state = self.conn.lock().await;
        let conn = open_conn_mut(&mut *state)?;
        let tx = conn
            .transaction()
            .map_err(|e| VitalsError::StorageWrite(format!("begin failed: {e}")))?;
        tx.execute(
            "INSERT INTO custom_metrics (timestamp, name, value, labels)
             VALUES (?1, ?2, ?3, ?4)",
            params![encode_ts(record.timestamp), record.name, record.value, labels],
        )
        .map_err(|e| VitalsError::StorageWrite(format!("insert custom metric failed: {e}")))?;
        tx.commit()
            .map_err(|e| VitalsError::StorageWrite(format!("commit failed: {e}")))
    }

    async fn query_http_metrics(
        &self,
        range: TimeRange,
        filter: HttpFilter,
        group_by: Option<GroupBy>,
    ) -> Result<HttpQueryResult> {
        let from_s = encode_ts(range.from);
        let to_s = encode_ts(range.to);

        let state = self.conn.lock().await;
        let conn = open_conn(&*state)?;

        let mut where_sql = String::from("WHERE timestamp >= ? AND timestamp < ?");
        let mut args: Vec<&dyn ToSql> = vec![&from_s, &to_s];
        if let Some(ep) = filter.endpoint.as_ref() {
            where_sql.push_str(" AND endpoint = ?");
            args.push(ep);
        }
        if let Some(m) = filter.method.as_ref() {
            where_sql.push_str(" AND method = ?");
            args.push(m);
        }

        match group_by {
            None => {
                let sql = format!(
                    "SELECT timestamp, endpoint, method, status_code, latency_ms
                     FROM http_metrics {where_sql} ORDER BY timestamp"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VitalsError::Internal(format!("prepare failed: {e}")))?;
                let rows = stmt
                    .query_map(&args[..], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, u16>(3)?,
                            row.get::<_, f64>(4)?,
                        ))
                    })
                    .map_err(|e| VitalsError::Internal(format!("query failed: {e}")))?;

                let mut records = Vec::new();
                for row in rows {
                    let (ts, endpoint, method, status_code, latency_ms) =
                        row.map_err(|e| VitalsError::Internal(format!("row failed: {e}")))?;
                    records.push(HttpMetricRecord {
                        timestamp: decode_ts(&ts)?,
                        endpoint,
                        method,
                        status_code,
                        latency_ms,
                    });
                }
                Ok(HttpQueryResult::Records(records))
            }
            Some(GroupBy::Hour) => {
                let sql = format!(
                    "SELECT strftime('%Y-%m-%dT%H:00:00Z', timestamp) AS bucket,
                            COUNT(*), AVG(latency_ms),
                            SUM(CASE WHEN status_code >= 500 THEN 1 ELSE 0 END)
                     FROM http_metrics {where_sql}
                     GROUP BY bucket ORDER BY bucket"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VitalsError::Internal(format!("prepare failed: {e}")))?;
                let rows = stmt
                    .query_map(&args[..], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, u64>(3)?,
                        ))
                    })
                    .map_err(|e| VitalsError::Internal(format!("query failed: {e}")))?;

                let mut buckets = Vec::new();
                for row in rows {
                    let (bucket, count, avg_latency_ms, error_count) =
                        row.map_err(|e| VitalsError::Internal(format!("row failed: {e}")))?;
                    buckets.push(HttpHourBucket {
                        bucket_start: decode_ts(&bucket)?,
                        count,
                        avg_latency_ms,
                        error_count,
                    });
                }
                Ok(HttpQueryResult::Buckets(buckets))
            }
        }
    }

    async fn query_custom_metrics(
        &self,
        range: TimeRange,
        name: Option<String>,
        group_by: Option<GroupBy>,
    ) -> Result<CustomQueryResult> {
        let from_s = encode_ts(range.from);
        let to_s = encode_ts(range.to);

        let state = self.conn.lock().await;
        let conn = open_conn(&*state)?;

        let mut where_sql = String::from("WHERE timestamp >= ? AND timestamp < ?");
        let mut args: Vec<&dyn ToSql> = vec![&from_s, &to_s];
        if let Some(n) = name.as_ref() {
            where_sql.push_str(" AND name = ?");
            args.push(n);
        }

        match group_by {
            None => {
                let sql = format!(
                    "SELECT timestamp, name, value, labels
                     FROM custom_metrics {where_sql} ORDER BY timestamp"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VitalsError::Internal(format!("prepare failed: {e}")))?;
                let rows = stmt
                    .query_map(&args[..], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    })
                    .map_err(|e| VitalsError::Internal(format!("query failed: {e}")))?;

                let mut records = Vec::new();
                for row in rows {
                    let (ts, name, value, labels) =
                        row.map_err(|e| VitalsError::Internal(format!("row failed: {e}")))?;
                    records.push(CustomMetricRecord {
                        timestamp: decode_ts(&ts)?,
                        name,
                        value,
                        labels: decode_labels(labels)?,
                    });
                }
                Ok(CustomQueryResult::Records(records))
            }
            Some(GroupBy::Hour) => {
                // Buckets are partitioned by name so unrelated metrics are
                // never summed together.
                let sql = format!(
                    "SELECT strftime('%Y-%m-%dT%H:00:00Z', timestamp) AS bucket,
                            name, COUNT(*), SUM(value)
                     FROM custom_metrics {where_sql}
                     GROUP BY bucket, name ORDER BY bucket, name"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| VitalsError::Internal(format!("prepare failed: {e}")))?;
                let rows = stmt
                    .query_map(&args[..], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, u64>(2)?,
                            row.get::<_, f64>(3)?,
                        ))
                    })
                    .map_err(|e| VitalsError::Internal(format!("query failed: {e}")))?;

                let mut buckets = Vec::new();
                for row in rows {
                    let (bucket, name, count, sum_value) =
                        row.map_err(|e| VitalsError::Internal(format!("row failed: {e}")))?;
                    buckets.push(CustomHourBucket {
                        bucket_start: decode_ts(&bucket)?,
                        name,
                        count,
                        sum_value,
                    });
                }
                Ok(CustomQueryResult::Buckets(buckets))
            }
        }
    }

    async fn endpoint_stats(&self) -> Result<BTreeMap<EndpointKey, EndpointStat>> {
        let state = self.conn.lock().await;
        let conn = open_conn(&*state)?;

        let mut stmt = conn
            .prepare(
                "SELECT endpoint, method, COUNT(*), AVG(latency_ms),
                        SUM(CASE WHEN status_code >= 500 THEN 1 ELSE 0 END)
                 FROM http_metrics GROUP BY endpoint, method",
            )
            .map_err(|e| VitalsError::Internal(format!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, u64>(4)?,
                ))
            })
            .map_err(|e| VitalsError::Internal(format!("query failed: {e}")))?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (endpoint, method, count, avg_latency_ms, error_count) =
                row.map_err(|e| VitalsError::Internal(format!("row failed: {e}")))?;
            stats.insert(
                EndpointKey { endpoint, method },
                EndpointStat {
                    count,
                    avg_latency_ms,
                    error_count,
                },
            );
        }
        Ok(stats)
    }

    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> Result<u64> {
        let before_s = encode_ts(before);
        let mut state = self.conn.lock().await;
        let conn = open_conn_mut(&mut *state)?;

        let tx = conn
            .transaction()
            .map_err(|e| VitalsError::StorageWrite(format!("begin failed: {e}")))?;
        let http = tx
            .execute("DELETE FROM http_metrics WHERE timestamp < ?1", params![before_s])
            .map_err(|e| VitalsError::StorageWrite(format!("delete http metrics failed: {e}")))?;
        let custom = tx
            .execute(
                "DELETE FROM custom_metrics WHERE timestamp < ?1",
                params![before_s],
            )
            .map_err(|e| VitalsError::StorageWrite(format!("delete custom metrics failed: {e}")))?;
        tx.commit()
            .map_err(|e| VitalsError::StorageWrite(format!("commit failed: {e}")))?;

        Ok((http + custom) as u64)
    }
}

fn open_conn(state: &ConnState) -> Result<&Connection> {
    match state {
        ConnState::Open(conn) => Ok(conn),
        ConnState::Closed => Err(VitalsError::StorageClosed),
        ConnState::Unopened => Err(VitalsError::Internal(
            "sqlite backend used before initialize".into(),
        )),
    }
}

fn open_conn_mut(state: &mut ConnState) -> Result<&mut Connection> {
    match state {
        ConnState::Open(conn) => Ok(conn),
        ConnState::Closed => Err(VitalsError::StorageClosed),
        ConnState::Unopened => Err(VitalsError::Internal(
            "sqlite backend used before initialize".into(),
        )),
    }
}
