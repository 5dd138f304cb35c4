//! Append-only sample store.
//!
//! Samples are interval metrics written once per cycle per observed
//! (fingerprint, plan) and never updated. Reads are window queries serving
//! the baseline builder, the detector and the hotspot ranking.

use crate::models::{QuerySample, Target};
use crate::utils::MonitorResult;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of samples in one transaction.
    pub async fn append(&self, samples: &[QuerySample]) -> MonitorResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for sample in samples {
            sqlx::query(
                r#"
                INSERT INTO samples
                    (fingerprint_id, instance_name, database_name, sampled_at_utc, plan_hash,
                     exec_count_delta,
                     total_cpu_us_delta, avg_cpu_us, min_cpu_us, max_cpu_us,
                     total_duration_us_delta, avg_duration_us, min_duration_us, max_duration_us,
                     avg_logical_reads, avg_logical_writes, avg_physical_reads,
                     avg_memory_grant_kb, avg_spills_kb)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(sample.fingerprint_id)
            .bind(&sample.instance_name)
            .bind(&sample.database_name)
            .bind(sample.sampled_at_utc)
            .bind(&sample.plan_hash)
            .bind(sample.exec_count_delta)
            .bind(sample.total_cpu_us_delta)
            .bind(sample.avg_cpu_us)
            .bind(sample.min_cpu_us)
            .bind(sample.max_cpu_us)
            .bind(sample.total_duration_us_delta)
            .bind(sample.avg_duration_us)
            .bind(sample.min_duration_us)
            .bind(sample.max_duration_us)
            .bind(sample.avg_logical_reads)
            .bind(sample.avg_logical_writes)
            .bind(sample.avg_physical_reads)
            .bind(sample.avg_memory_grant_kb)
            .bind(sample.avg_spills_kb)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Samples for one fingerprint inside a window, oldest first.
    pub async fn get_for_fingerprint(
        &self,
        fingerprint_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<QuerySample>> {
        let rows: Vec<QuerySample> = sqlx::query_as(
            r#"
            SELECT * FROM samples
            WHERE fingerprint_id = ? AND sampled_at_utc >= ? AND sampled_at_utc < ?
            ORDER BY sampled_at_utc ASC
            "#,
        )
        .bind(fingerprint_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Samples for one target inside a window, oldest first.
    pub async fn get_for_target(
        &self,
        target: &Target,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<QuerySample>> {
        let rows: Vec<QuerySample> = sqlx::query_as(
            r#"
            SELECT * FROM samples
            WHERE instance_name = ? AND database_name = ?
              AND sampled_at_utc >= ? AND sampled_at_utc < ?
            ORDER BY sampled_at_utc ASC
            "#,
        )
        .bind(&target.instance_name)
        .bind(&target.database_name)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct fingerprints that produced samples for a target in a window.
    pub async fn fingerprint_ids_in_window(
        &self,
        target: &Target,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT fingerprint_id FROM samples
            WHERE instance_name = ? AND database_name = ?
              AND sampled_at_utc >= ? AND sampled_at_utc < ?
            ORDER BY fingerprint_id
            "#,
        )
        .bind(&target.instance_name)
        .bind(&target.database_name)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Delete samples older than the cutoff; returns how many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64> {
        let result = sqlx::query("DELETE FROM samples WHERE sampled_at_utc < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;

    pub(crate) fn sample_at(
        fingerprint_id: i64,
        sampled_at_utc: DateTime<Utc>,
        avg_duration_us: f64,
    ) -> QuerySample {
        QuerySample {
            id: 0,
            fingerprint_id,
            instance_name: "i1".into(),
            database_name: "d1".into(),
            sampled_at_utc,
            plan_hash: None,
            exec_count_delta: 10,
            total_cpu_us_delta: 1000,
            avg_cpu_us: 100.0,
            min_cpu_us: None,
            max_cpu_us: None,
            total_duration_us_delta: (avg_duration_us * 10.0) as i64,
            avg_duration_us,
            min_duration_us: None,
            max_duration_us: None,
            avg_logical_reads: 50.0,
            avg_logical_writes: 1.0,
            avg_physical_reads: 0.0,
            avg_memory_grant_kb: None,
            avg_spills_kb: None,
        }
    }

    #[tokio::test]
    async fn test_window_queries_and_purge() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let store = SampleStore::new(pool);
        let target = Target::new("i1", "d1");

        let now = Utc::now();
        let old = now - Duration::days(10);
        store
            .append(&[
                sample_at(1, old, 500.0),
                sample_at(1, now - Duration::minutes(30), 600.0),
                sample_at(2, now - Duration::minutes(10), 700.0),
            ])
            .await
            .unwrap();

        let recent = store
            .get_for_fingerprint(1, now - Duration::hours(1), now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].avg_duration_us, 600.0);

        let ids = store
            .fingerprint_ids_in_window(&target, now - Duration::hours(1), now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let purged = store.purge_older_than(now - Duration::days(7)).await.unwrap();
        assert_eq!(purged, 1);
    }
}
