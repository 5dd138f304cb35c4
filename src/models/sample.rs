use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row returned by a stats source: current cumulative counters for a
/// query, as maintained by the target engine since plan-cache insertion.
///
/// Counters are monotonically non-decreasing between observations except on
/// target restart or counter reset; the delta engine handles both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedRow {
    /// Engine-native query hash, if the source exposes one. A hint only.
    pub native_query_hash: Option<String>,
    pub sql_text: String,
    pub plan_hash: Option<String>,
    pub vendor_plan_id: Option<i64>,
    pub exec_count: i64,
    pub total_cpu_us: i64,
    pub total_duration_us: i64,
    pub total_logical_reads: i64,
    pub total_logical_writes: i64,
    pub total_physical_reads: i64,
    /// Per-execution extremes, when the source tracks them.
    pub min_cpu_us: Option<i64>,
    pub max_cpu_us: Option<i64>,
    pub min_duration_us: Option<i64>,
    pub max_duration_us: Option<i64>,
    /// Optional resource counters not every engine exposes.
    pub total_memory_grant_kb: Option<i64>,
    pub total_spills_kb: Option<i64>,
    pub last_execution_time_utc: Option<DateTime<Utc>>,
}

/// Most recent cumulative counters per (target, fingerprint, plan).
/// Exactly one row per key; overwritten on every cycle that observes it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CumulativeSnapshot {
    pub instance_name: String,
    pub database_name: String,
    pub fingerprint_id: i64,
    pub plan_hash: Option<String>,
    pub snapshot_time_utc: DateTime<Utc>,
    pub exec_count: i64,
    pub total_cpu_us: i64,
    pub total_duration_us: i64,
    pub total_logical_reads: i64,
    pub total_logical_writes: i64,
    pub total_physical_reads: i64,
}

/// Interval metrics for one fingerprint over one collection cycle.
/// Immutable once written; the sample store is append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuerySample {
    pub id: i64,
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub sampled_at_utc: DateTime<Utc>,
    pub plan_hash: Option<String>,
    pub exec_count_delta: i64,
    pub total_cpu_us_delta: i64,
    pub avg_cpu_us: f64,
    pub min_cpu_us: Option<f64>,
    pub max_cpu_us: Option<f64>,
    pub total_duration_us_delta: i64,
    pub avg_duration_us: f64,
    pub min_duration_us: Option<f64>,
    pub max_duration_us: Option<f64>,
    pub avg_logical_reads: f64,
    pub avg_logical_writes: f64,
    pub avg_physical_reads: f64,
    pub avg_memory_grant_kb: Option<f64>,
    pub avg_spills_kb: Option<f64>,
}
