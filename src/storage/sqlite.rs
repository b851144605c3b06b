//! SQLite sample store
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (aggregator, query endpoints) do not block the
//!   collectors' batch inserts
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{BucketQuery, HealthStatus, SampleQuery, SampleStore};
use super::error::{StorageError, StorageResult};
use super::schema::{Sample, WindowBucket};
use crate::ProbeKind;

const SAMPLE_COLUMNS: &str =
    "id, ts, probe, key, success, latency_ms, ttfb_ms, status_code, hops, error";

const BUCKET_COLUMNS: &str =
    "probe, key, ts_min, sent, received, loss_pct, avg_ms, p50_ms, p95_ms, stdev_ms, complete";

/// SQLite sample store
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database and run migrations
    ///
    /// This is the "prepare store" step of startup; a failure here aborts
    /// the agent.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn parse_probe(value: &str) -> StorageResult<ProbeKind> {
        value
            .parse()
            .map_err(|e: String| StorageError::InvalidData(e))
    }

    fn sample_from_row(row: &SqliteRow) -> StorageResult<Sample> {
        let probe: String = row.try_get("probe")?;
        let status_code: Option<i64> = row.try_get("status_code")?;
        let hops: Option<i64> = row.try_get("hops")?;

        Ok(Sample {
            id: Some(row.try_get("id")?),
            ts: row.try_get("ts")?,
            probe: Self::parse_probe(&probe)?,
            key: row.try_get("key")?,
            success: row.try_get("success")?,
            latency_ms: row.try_get("latency_ms")?,
            ttfb_ms: row.try_get("ttfb_ms")?,
            status_code: status_code.and_then(|v| u16::try_from(v).ok()),
            hops: hops.and_then(|v| u32::try_from(v).ok()),
            error: row.try_get("error")?,
        })
    }

    fn bucket_from_row(row: &SqliteRow) -> StorageResult<WindowBucket> {
        let probe: String = row.try_get("probe")?;
        let sent: i64 = row.try_get("sent")?;
        let received: i64 = row.try_get("received")?;

        Ok(WindowBucket {
            probe: Self::parse_probe(&probe)?,
            key: row.try_get("key")?,
            ts_min: row.try_get("ts_min")?,
            sent: sent.max(0) as u64,
            received: received.max(0) as u64,
            loss_pct: row.try_get("loss_pct")?,
            avg_ms: row.try_get("avg_ms")?,
            p50_ms: row.try_get("p50_ms")?,
            p95_ms: row.try_get("p95_ms")?,
            stdev_ms: row.try_get("stdev_ms")?,
            complete: row.try_get("complete")?,
        })
    }
}

#[async_trait]
impl SampleStore for SqliteBackend {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn append_samples(&self, samples: Vec<Sample>) -> StorageResult<Vec<i64>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(samples.len());

        for sample in samples {
            let result = sqlx::query(
                r#"
                INSERT INTO samples (
                    ts, probe, key, success, latency_ms, ttfb_ms, status_code, hops, error
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(sample.ts)
            .bind(sample.probe.as_str())
            .bind(&sample.key)
            .bind(sample.success)
            .bind(sample.latency_ms)
            .bind(sample.ttfb_ms)
            .bind(sample.status_code.map(i64::from))
            .bind(sample.hops.map(i64::from))
            .bind(&sample.error)
            .execute(&mut *tx)
            .await?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;

        debug!("appended {} samples", ids.len());
        Ok(ids)
    }

    #[instrument(skip(self), fields(probe = %query.probe))]
    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<Sample>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE probe = "));
        builder.push_bind(query.probe.as_str());

        if let Some(key) = query.key {
            builder.push(" AND key = ").push_bind(key);
        }

        builder
            .push(" AND ts >= ")
            .push_bind(query.from_ts)
            .push(" AND ts <= ")
            .push_bind(query.to_ts)
            .push(" ORDER BY ts ASC, id ASC");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let samples = rows
            .iter()
            .map(Self::sample_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("query returned {} samples", samples.len());
        Ok(samples)
    }

    #[instrument(skip(self), fields(probe = %query.probe))]
    async fn query_buckets(&self, query: BucketQuery) -> StorageResult<Vec<WindowBucket>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {BUCKET_COLUMNS} FROM window_buckets WHERE probe = "
        ));
        builder.push_bind(query.probe.as_str());

        if let Some(key) = query.key {
            builder.push(" AND key = ").push_bind(key);
        }

        builder
            .push(" AND ts_min >= ")
            .push_bind(query.from_ts_min)
            .push(" AND ts_min <= ")
            .push_bind(query.to_ts)
            .push(" ORDER BY ts_min ASC, key ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::bucket_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn latest_sample(
        &self,
        probe: ProbeKind,
        key: Option<&str>,
    ) -> StorageResult<Option<Sample>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE probe = "));
        builder.push_bind(probe.as_str());

        if let Some(key) = key {
            builder.push(" AND key = ").push_bind(key.to_string());
        }

        builder.push(" ORDER BY ts DESC, id DESC LIMIT 1");

        let row = builder.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::sample_from_row).transpose()
    }

    #[instrument(skip(self, buckets), fields(count = buckets.len()))]
    async fn upsert_buckets(&self, buckets: Vec<WindowBucket>) -> StorageResult<()> {
        if buckets.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for bucket in buckets {
            sqlx::query(
                r#"
                INSERT INTO window_buckets (
                    probe, key, ts_min, sent, received,
                    loss_pct, avg_ms, p50_ms, p95_ms, stdev_ms, complete
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (probe, key, ts_min) DO UPDATE SET
                    sent = excluded.sent,
                    received = excluded.received,
                    loss_pct = excluded.loss_pct,
                    avg_ms = excluded.avg_ms,
                    p50_ms = excluded.p50_ms,
                    p95_ms = excluded.p95_ms,
                    stdev_ms = excluded.stdev_ms,
                    complete = excluded.complete
                "#,
            )
            .bind(bucket.probe.as_str())
            .bind(&bucket.key)
            .bind(bucket.ts_min)
            .bind(bucket.sent as i64)
            .bind(bucket.received as i64)
            .bind(bucket.loss_pct)
            .bind(bucket.avg_ms)
            .bind(bucket.p50_ms)
            .bind(bucket.p95_ms)
            .bind(bucket.stdev_ms)
            .bind(bucket.complete)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
