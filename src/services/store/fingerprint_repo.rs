//! Fingerprint repository.
//!
//! The upsert is the linearization point for query identity: concurrent
//! callers racing on an unseen hash get exactly one row, and every caller
//! receives the winner's id.

use crate::models::{Fingerprint, QueryIdentity};
use crate::utils::MonitorResult;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct FingerprintRepo {
    pool: SqlitePool,
}

impl FingerprintRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the fingerprint if its hash is unseen, otherwise touch
    /// `last_seen_utc`. Returns `(fingerprint_id, is_new)`.
    ///
    /// `INSERT .. ON CONFLICT DO NOTHING` is atomic in SQLite, so the classic
    /// two-writers-one-hash race resolves to a single winner; the loser falls
    /// through to the SELECT and reads the winner's row.
    pub async fn upsert(
        &self,
        instance: &str,
        database: &str,
        identity: &QueryIdentity,
        native_hint: Option<&str>,
    ) -> MonitorResult<(i64, bool)> {
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO fingerprints
                (hash, normalized_text, sample_text, first_seen_utc, last_seen_utc,
                 instance_name, database_name, native_hash_hint)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(&identity.hash)
        .bind(&identity.normalized_text)
        .bind(&identity.sample_text)
        .bind(now)
        .bind(now)
        .bind(instance)
        .bind(database)
        .bind(native_hint)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok((inserted.last_insert_rowid(), true));
        }

        sqlx::query("UPDATE fingerprints SET last_seen_utc = ? WHERE hash = ?")
            .bind(now)
            .bind(&identity.hash)
            .execute(&self.pool)
            .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM fingerprints WHERE hash = ?")
            .bind(&identity.hash)
            .fetch_one(&self.pool)
            .await?;

        Ok((id, false))
    }

    pub async fn get(&self, id: i64) -> MonitorResult<Option<Fingerprint>> {
        let row: Option<Fingerprint> =
            sqlx::query_as("SELECT * FROM fingerprints WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn get_by_hash(&self, hash: &str) -> MonitorResult<Option<Fingerprint>> {
        let row: Option<Fingerprint> =
            sqlx::query_as("SELECT * FROM fingerprints WHERE hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// All fingerprint ids known to the system (used by the baseline rebuild).
    pub async fn all_ids(&self) -> MonitorResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM fingerprints ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count(&self) -> MonitorResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::services::fingerprint::fingerprint;

    async fn repo() -> FingerprintRepo {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        FingerprintRepo::new(pool)
    }

    #[tokio::test]
    async fn test_upsert_returns_same_id_for_equivalent_sql() {
        let repo = repo().await;

        let a = fingerprint("SELECT * FROM T WHERE id = 1");
        let b = fingerprint("SELECT * FROM T WHERE id = 42");

        let (id_a, new_a) = repo.upsert("i1", "d1", &a, None).await.unwrap();
        let (id_b, new_b) = repo.upsert("i1", "d1", &b, None).await.unwrap();

        assert!(new_a);
        assert!(!new_b);
        assert_eq!(id_a, id_b);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_touches_last_seen() {
        let repo = repo().await;
        let identity = fingerprint("SELECT 1");

        let (id, _) = repo.upsert("i1", "d1", &identity, Some("0xABC")).await.unwrap();
        repo.upsert("i1", "d1", &identity, None).await.unwrap();

        let stored = repo.get(id).await.unwrap().unwrap();
        assert!(stored.last_seen_utc >= stored.first_seen_utc);
        assert_eq!(stored.native_hash_hint.as_deref(), Some("0xABC"));
    }
}
