//! Baseline repository.
//!
//! Supersession is atomic: flipping the prior active row and inserting the
//! replacement happen in one transaction, so no reader ever observes two
//! active baselines for a fingerprint. A partial unique index enforces the
//! invariant at the storage level as well.

use crate::models::QueryBaseline;
use crate::utils::MonitorResult;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct BaselineRepo {
    pool: SqlitePool,
}

impl BaselineRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_active(&self, fingerprint_id: i64) -> MonitorResult<Option<QueryBaseline>> {
        let row: Option<QueryBaseline> = sqlx::query_as(
            "SELECT * FROM baselines WHERE fingerprint_id = ? AND is_active = 1",
        )
        .bind(fingerprint_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Persist a freshly built baseline, superseding any active one.
    pub async fn save(&self, baseline: &QueryBaseline) -> MonitorResult<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE baselines SET is_active = 0, superseded_at_utc = ?
            WHERE fingerprint_id = ? AND is_active = 1
            "#,
        )
        .bind(Utc::now())
        .bind(baseline.fingerprint_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO baselines
                (fingerprint_id, window_start_utc, window_end_utc, sample_count, total_executions,
                 duration_p50_us, duration_p95_us, duration_p99_us,
                 cpu_p50_us, cpu_p95_us, logical_reads_p50, logical_reads_p95,
                 duration_stddev_us, typical_plan_hash, is_active, superseded_at_utc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, NULL)
            "#,
        )
        .bind(baseline.fingerprint_id)
        .bind(baseline.window_start_utc)
        .bind(baseline.window_end_utc)
        .bind(baseline.sample_count)
        .bind(baseline.total_executions)
        .bind(baseline.duration_p50_us)
        .bind(baseline.duration_p95_us)
        .bind(baseline.duration_p99_us)
        .bind(baseline.cpu_p50_us)
        .bind(baseline.cpu_p95_us)
        .bind(baseline.logical_reads_p50)
        .bind(baseline.logical_reads_p95)
        .bind(baseline.duration_stddev_us)
        .bind(&baseline.typical_plan_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Fingerprints whose active baseline has aged past `max_age`.
    pub async fn get_stale(&self, max_age: Duration) -> MonitorResult<Vec<i64>> {
        let cutoff = Utc::now() - max_age;
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT fingerprint_id FROM baselines
            WHERE is_active = 1 AND window_end_utc < ?
            ORDER BY fingerprint_id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn active_count(&self, fingerprint_id: i64) -> MonitorResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM baselines WHERE fingerprint_id = ? AND is_active = 1",
        )
        .bind(fingerprint_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn baseline(fingerprint_id: i64, p95: f64) -> QueryBaseline {
        let now = Utc::now();
        QueryBaseline {
            id: 0,
            fingerprint_id,
            window_start_utc: now - Duration::days(7),
            window_end_utc: now,
            sample_count: 20,
            total_executions: 2000,
            duration_p50_us: p95 / 2.0,
            duration_p95_us: p95,
            duration_p99_us: p95 * 1.2,
            cpu_p50_us: 100.0,
            cpu_p95_us: 200.0,
            logical_reads_p50: 10.0,
            logical_reads_p95: 20.0,
            duration_stddev_us: 50.0,
            typical_plan_hash: Some("0xA".into()),
            is_active: true,
            superseded_at_utc: None,
        }
    }

    #[tokio::test]
    async fn test_supersession_keeps_one_active() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let repo = BaselineRepo::new(pool);

        repo.save(&baseline(7, 1000.0)).await.unwrap();
        repo.save(&baseline(7, 1100.0)).await.unwrap();
        repo.save(&baseline(7, 1200.0)).await.unwrap();

        assert_eq!(repo.active_count(7).await.unwrap(), 1);
        let active = repo.get_active(7).await.unwrap().unwrap();
        assert_eq!(active.duration_p95_us, 1200.0);
        assert!(active.superseded_at_utc.is_none());
    }

    #[tokio::test]
    async fn test_stale_detection() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let repo = BaselineRepo::new(pool);

        let mut old = baseline(1, 500.0);
        old.window_end_utc = Utc::now() - Duration::days(3);
        repo.save(&old).await.unwrap();
        repo.save(&baseline(2, 500.0)).await.unwrap();

        let stale = repo.get_stale(Duration::days(1)).await.unwrap();
        assert_eq!(stale, vec![1]);
    }
}
