use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Percentile summary of a fingerprint's historical samples, used as the
/// reference for regression detection.
///
/// At most one active baseline exists per fingerprint; building a new one
/// supersedes the prior active row in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueryBaseline {
    pub id: i64,
    pub fingerprint_id: i64,
    pub window_start_utc: DateTime<Utc>,
    pub window_end_utc: DateTime<Utc>,
    pub sample_count: i64,
    pub total_executions: i64,
    pub duration_p50_us: f64,
    pub duration_p95_us: f64,
    pub duration_p99_us: f64,
    pub cpu_p50_us: f64,
    pub cpu_p95_us: f64,
    pub logical_reads_p50: f64,
    pub logical_reads_p95: f64,
    pub duration_stddev_us: f64,
    /// Plan hash with the largest execution share in the window.
    pub typical_plan_hash: Option<String>,
    pub is_active: bool,
    pub superseded_at_utc: Option<DateTime<Utc>>,
}

/// Aggregate of a fingerprint's samples over the recent window, compared
/// against the active baseline by the detector.
#[derive(Debug, Clone, Default)]
pub struct AggregatedRecent {
    pub sample_count: i64,
    pub total_executions: i64,
    pub p95_duration_us: f64,
    pub p95_cpu_us: f64,
    pub avg_logical_reads: f64,
    /// Plan hash of the most recent sample in the window.
    pub current_plan_hash: Option<String>,
}
