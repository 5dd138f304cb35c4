//! Local persistence bootstrap: SQLite pool creation and schema.
//!
//! Fingerprints, snapshots, samples, baselines, events and the remediation
//! audit trail all live in one SQLite database owned by this process.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// Idempotent DDL, one statement per entry. Enums are stored as snake_case
/// TEXT, timestamps as RFC 3339 TEXT, hashes as lowercase hex TEXT.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS fingerprints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash TEXT NOT NULL UNIQUE,
        normalized_text TEXT NOT NULL,
        sample_text TEXT NOT NULL,
        first_seen_utc TEXT NOT NULL,
        last_seen_utc TEXT NOT NULL,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        native_hash_hint TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        fingerprint_id INTEGER NOT NULL,
        plan_hash TEXT NOT NULL DEFAULT '',
        snapshot_time_utc TEXT NOT NULL,
        exec_count INTEGER NOT NULL,
        total_cpu_us INTEGER NOT NULL,
        total_duration_us INTEGER NOT NULL,
        total_logical_reads INTEGER NOT NULL,
        total_logical_writes INTEGER NOT NULL,
        total_physical_reads INTEGER NOT NULL,
        PRIMARY KEY (instance_name, database_name, fingerprint_id, plan_hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint_id INTEGER NOT NULL,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        sampled_at_utc TEXT NOT NULL,
        plan_hash TEXT,
        exec_count_delta INTEGER NOT NULL,
        total_cpu_us_delta INTEGER NOT NULL,
        avg_cpu_us REAL NOT NULL,
        min_cpu_us REAL,
        max_cpu_us REAL,
        total_duration_us_delta INTEGER NOT NULL,
        avg_duration_us REAL NOT NULL,
        min_duration_us REAL,
        max_duration_us REAL,
        avg_logical_reads REAL NOT NULL,
        avg_logical_writes REAL NOT NULL,
        avg_physical_reads REAL NOT NULL,
        avg_memory_grant_kb REAL,
        avg_spills_kb REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_samples_fingerprint_time \
     ON samples (fingerprint_id, sampled_at_utc)",
    "CREATE INDEX IF NOT EXISTS idx_samples_target_time \
     ON samples (instance_name, database_name, sampled_at_utc)",
    r#"
    CREATE TABLE IF NOT EXISTS baselines (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint_id INTEGER NOT NULL,
        window_start_utc TEXT NOT NULL,
        window_end_utc TEXT NOT NULL,
        sample_count INTEGER NOT NULL,
        total_executions INTEGER NOT NULL,
        duration_p50_us REAL NOT NULL,
        duration_p95_us REAL NOT NULL,
        duration_p99_us REAL NOT NULL,
        cpu_p50_us REAL NOT NULL,
        cpu_p95_us REAL NOT NULL,
        logical_reads_p50 REAL NOT NULL,
        logical_reads_p95 REAL NOT NULL,
        duration_stddev_us REAL NOT NULL,
        typical_plan_hash TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        superseded_at_utc TEXT
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_baselines_one_active \
     ON baselines (fingerprint_id) WHERE is_active = 1",
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        fingerprint_id INTEGER NOT NULL,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        detected_at_utc TEXT NOT NULL,
        regression_type TEXT NOT NULL,
        metric_name TEXT NOT NULL,
        baseline_value REAL NOT NULL,
        current_value REAL NOT NULL,
        change_percent REAL NOT NULL,
        severity TEXT NOT NULL,
        is_plan_change INTEGER NOT NULL DEFAULT 0,
        baseline_plan_hash TEXT,
        current_plan_hash TEXT,
        status TEXT NOT NULL DEFAULT 'new',
        acknowledged_by TEXT,
        acknowledged_at_utc TEXT,
        resolved_by TEXT,
        resolved_at_utc TEXT,
        notes TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_fingerprint_status \
     ON events (fingerprint_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_events_detected ON events (detected_at_utc)",
    r#"
    CREATE TABLE IF NOT EXISTS remediation_audit (
        id TEXT PRIMARY KEY,
        timestamp_utc TEXT NOT NULL,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        fingerprint_id INTEGER NOT NULL,
        suggestion_type TEXT NOT NULL,
        script TEXT NOT NULL,
        is_dry_run INTEGER NOT NULL,
        success INTEGER NOT NULL,
        error TEXT,
        duration_ms INTEGER NOT NULL,
        initiated_by TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_fingerprint \
     ON remediation_audit (fingerprint_id, suggestion_type)",
];

/// Create the connection pool, creating the database file if missing.
pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(path) = url.strip_prefix("sqlite://")
        && let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = std::fs::create_dir_all(parent);
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Apply the schema, statement by statement.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
