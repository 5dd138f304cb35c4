//! Cumulative snapshot store.
//!
//! Holds exactly one row per (target, fingerprint, plan): the counters seen
//! on the most recent cycle, used by the delta engine. Plan-less rows use an
//! empty-string key internally so the primary key stays total.

use crate::models::{CumulativeSnapshot, Target};
use crate::utils::MonitorResult;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_last(
        &self,
        target: &Target,
        fingerprint_id: i64,
        plan_hash: Option<&str>,
    ) -> MonitorResult<Option<CumulativeSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM snapshots
            WHERE instance_name = ? AND database_name = ? AND fingerprint_id = ? AND plan_hash = ?
            "#,
        )
        .bind(&target.instance_name)
        .bind(&target.database_name)
        .bind(fingerprint_id)
        .bind(plan_hash.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_snapshot(&r)))
    }

    /// Upsert by (target, fingerprint, plan). Called strictly after the
    /// corresponding sample write.
    pub async fn save(&self, snapshot: &CumulativeSnapshot) -> MonitorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots
                (instance_name, database_name, fingerprint_id, plan_hash, snapshot_time_utc,
                 exec_count, total_cpu_us, total_duration_us,
                 total_logical_reads, total_logical_writes, total_physical_reads)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(instance_name, database_name, fingerprint_id, plan_hash) DO UPDATE SET
                snapshot_time_utc = excluded.snapshot_time_utc,
                exec_count = excluded.exec_count,
                total_cpu_us = excluded.total_cpu_us,
                total_duration_us = excluded.total_duration_us,
                total_logical_reads = excluded.total_logical_reads,
                total_logical_writes = excluded.total_logical_writes,
                total_physical_reads = excluded.total_physical_reads
            "#,
        )
        .bind(&snapshot.instance_name)
        .bind(&snapshot.database_name)
        .bind(snapshot.fingerprint_id)
        .bind(snapshot.plan_hash.as_deref().unwrap_or(""))
        .bind(snapshot.snapshot_time_utc)
        .bind(snapshot.exec_count)
        .bind(snapshot.total_cpu_us)
        .bind(snapshot.total_duration_us)
        .bind(snapshot.total_logical_reads)
        .bind(snapshot.total_logical_writes)
        .bind(snapshot.total_physical_reads)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count(&self) -> MonitorResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn map_snapshot(row: &sqlx::sqlite::SqliteRow) -> CumulativeSnapshot {
    let plan_hash: String = row.get("plan_hash");
    CumulativeSnapshot {
        instance_name: row.get("instance_name"),
        database_name: row.get("database_name"),
        fingerprint_id: row.get("fingerprint_id"),
        plan_hash: if plan_hash.is_empty() { None } else { Some(plan_hash) },
        snapshot_time_utc: row.get::<DateTime<Utc>, _>("snapshot_time_utc"),
        exec_count: row.get("exec_count"),
        total_cpu_us: row.get("total_cpu_us"),
        total_duration_us: row.get("total_duration_us"),
        total_logical_reads: row.get("total_logical_reads"),
        total_logical_writes: row.get("total_logical_writes"),
        total_physical_reads: row.get("total_physical_reads"),
    }
}
