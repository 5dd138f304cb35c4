//! Remediation audit trail.
//!
//! Strictly append-only: every executor invocation writes exactly one row,
//! whether it executed, dry-ran, failed, or was refused by a safety gate.

use crate::models::{RemediationAudit, RemediationType};
use crate::utils::MonitorResult;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct AuditRepo {
    pool: SqlitePool,
}

impl AuditRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, record: &RemediationAudit) -> MonitorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO remediation_audit
                (id, timestamp_utc, instance_name, database_name, fingerprint_id,
                 suggestion_type, script, is_dry_run, success, error, duration_ms, initiated_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.timestamp_utc)
        .bind(&record.instance_name)
        .bind(&record.database_name)
        .bind(record.fingerprint_id)
        .bind(record.suggestion_type.as_str())
        .bind(&record.script)
        .bind(record.is_dry_run)
        .bind(record.success)
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(&record.initiated_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether a suggestion of this type already ran successfully (for real,
    /// not as a dry run) against this fingerprint on this target.
    pub async fn was_applied(
        &self,
        instance: &str,
        database: &str,
        fingerprint_id: i64,
        suggestion_type: RemediationType,
    ) -> MonitorResult<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM remediation_audit
            WHERE instance_name = ? AND database_name = ? AND fingerprint_id = ?
              AND suggestion_type = ? AND success = 1 AND is_dry_run = 0
            "#,
        )
        .bind(instance)
        .bind(database)
        .bind(fingerprint_id)
        .bind(suggestion_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn recent(&self, limit: i64) -> MonitorResult<Vec<RemediationAudit>> {
        let rows = sqlx::query(
            "SELECT * FROM remediation_audit ORDER BY timestamp_utc DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let suggestion_type: String = row.get("suggestion_type");
                RemediationAudit {
                    id: row.get("id"),
                    timestamp_utc: row.get("timestamp_utc"),
                    instance_name: row.get("instance_name"),
                    database_name: row.get("database_name"),
                    fingerprint_id: row.get("fingerprint_id"),
                    suggestion_type: RemediationType::parse(&suggestion_type)
                        .unwrap_or(RemediationType::UpdateStatistics),
                    script: row.get("script"),
                    is_dry_run: row.get("is_dry_run"),
                    success: row.get("success"),
                    error: row.get("error"),
                    duration_ms: row.get("duration_ms"),
                    initiated_by: row.get("initiated_by"),
                }
            })
            .collect())
    }

    pub async fn count(&self) -> MonitorResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM remediation_audit")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Utc;

    fn record(id: &str, success: bool, dry_run: bool) -> RemediationAudit {
        RemediationAudit {
            id: id.to_string(),
            timestamp_utc: Utc::now(),
            instance_name: "i1".into(),
            database_name: "d1".into(),
            fingerprint_id: 9,
            suggestion_type: RemediationType::UpdateStatistics,
            script: "UPDATE STATISTICS dbo.T".into(),
            is_dry_run: dry_run,
            success,
            error: None,
            duration_ms: 12,
            initiated_by: "scheduler".into(),
        }
    }

    #[tokio::test]
    async fn test_was_applied_ignores_dry_runs_and_failures() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let repo = AuditRepo::new(pool);

        repo.append(&record("a1", true, true)).await.unwrap();
        repo.append(&record("a2", false, false)).await.unwrap();
        assert!(
            !repo
                .was_applied("i1", "d1", 9, RemediationType::UpdateStatistics)
                .await
                .unwrap()
        );

        repo.append(&record("a3", true, false)).await.unwrap();
        assert!(
            repo.was_applied("i1", "d1", 9, RemediationType::UpdateStatistics)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .was_applied("i1", "d1", 9, RemediationType::ForcePlan)
                .await
                .unwrap()
        );
    }
}
