//! Delta engine: cumulative counters in, interval samples out.
//!
//! The engine compares the current observation against the last stored
//! snapshot for the same (target, fingerprint, plan) lineage:
//!
//! - no prior snapshot: bootstrap, deltas equal the cumulative totals
//! - prior exec_count exceeds current: counter reset (restart or cache
//!   eviction), deltas equal the new cumulative totals
//! - otherwise: componentwise differences, clamped at zero
//!
//! Callers must write the sample before upserting the snapshot; a crash
//! between the two overcounts exactly one interval on the next cycle.

use crate::models::{CumulativeSnapshot, ObservedRow, QuerySample, Target};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Result of one delta computation: the sample to append and the snapshot to
/// upsert afterwards.
#[derive(Debug)]
pub struct DeltaOutcome {
    pub sample: QuerySample,
    pub snapshot: CumulativeSnapshot,
    pub was_bootstrap: bool,
    pub was_reset: bool,
}

pub struct DeltaEngine;

impl DeltaEngine {
    /// Convert one observation into an interval sample.
    pub fn compute(
        target: &Target,
        fingerprint_id: i64,
        prior: Option<&CumulativeSnapshot>,
        row: &ObservedRow,
        sampled_at_utc: DateTime<Utc>,
    ) -> DeltaOutcome {
        let (deltas, was_bootstrap, was_reset) = match prior {
            None => (Deltas::from_cumulative(row), true, false),
            Some(prev) if prev.exec_count > row.exec_count => {
                info!(
                    target_key = %target.key(),
                    fingerprint_id,
                    prior_execs = prev.exec_count,
                    current_execs = row.exec_count,
                    "counter reset detected, emitting cumulative totals as deltas"
                );
                (Deltas::from_cumulative(row), false, true)
            },
            Some(prev) => (Deltas::diff(target, fingerprint_id, prev, row), false, false),
        };

        let execs = deltas.exec_count.max(1) as f64;
        let avg_cpu_us = deltas.total_cpu_us as f64 / execs;
        let avg_duration_us = deltas.total_duration_us as f64 / execs;

        let sample = QuerySample {
            id: 0,
            fingerprint_id,
            instance_name: target.instance_name.clone(),
            database_name: target.database_name.clone(),
            sampled_at_utc,
            plan_hash: row.plan_hash.clone(),
            exec_count_delta: deltas.exec_count,
            total_cpu_us_delta: deltas.total_cpu_us,
            avg_cpu_us,
            min_cpu_us: Some(row.min_cpu_us.map(|v| v as f64).unwrap_or(avg_cpu_us)),
            max_cpu_us: Some(row.max_cpu_us.map(|v| v as f64).unwrap_or(avg_cpu_us)),
            total_duration_us_delta: deltas.total_duration_us,
            avg_duration_us,
            min_duration_us: Some(
                row.min_duration_us.map(|v| v as f64).unwrap_or(avg_duration_us),
            ),
            max_duration_us: Some(
                row.max_duration_us.map(|v| v as f64).unwrap_or(avg_duration_us),
            ),
            avg_logical_reads: deltas.total_logical_reads as f64 / execs,
            avg_logical_writes: deltas.total_logical_writes as f64 / execs,
            avg_physical_reads: deltas.total_physical_reads as f64 / execs,
            avg_memory_grant_kb: row.total_memory_grant_kb.map(|v| v as f64 / execs),
            avg_spills_kb: row.total_spills_kb.map(|v| v as f64 / execs),
        };

        let snapshot = CumulativeSnapshot {
            instance_name: target.instance_name.clone(),
            database_name: target.database_name.clone(),
            fingerprint_id,
            plan_hash: row.plan_hash.clone(),
            snapshot_time_utc: sampled_at_utc,
            exec_count: row.exec_count,
            total_cpu_us: row.total_cpu_us,
            total_duration_us: row.total_duration_us,
            total_logical_reads: row.total_logical_reads,
            total_logical_writes: row.total_logical_writes,
            total_physical_reads: row.total_physical_reads,
        };

        DeltaOutcome { sample, snapshot, was_bootstrap, was_reset }
    }
}

/// Componentwise interval counters, all guaranteed non-negative.
struct Deltas {
    exec_count: i64,
    total_cpu_us: i64,
    total_duration_us: i64,
    total_logical_reads: i64,
    total_logical_writes: i64,
    total_physical_reads: i64,
}

impl Deltas {
    fn from_cumulative(row: &ObservedRow) -> Self {
        Self {
            exec_count: row.exec_count.max(0),
            total_cpu_us: row.total_cpu_us.max(0),
            total_duration_us: row.total_duration_us.max(0),
            total_logical_reads: row.total_logical_reads.max(0),
            total_logical_writes: row.total_logical_writes.max(0),
            total_physical_reads: row.total_physical_reads.max(0),
        }
    }

    /// Componentwise difference. exec_count grew monotonically here, but an
    /// individual counter may still have gone backwards on engine anomalies;
    /// those components clamp to zero with a warning.
    fn diff(
        target: &Target,
        fingerprint_id: i64,
        prev: &CumulativeSnapshot,
        row: &ObservedRow,
    ) -> Self {
        let mut clamped = false;
        let mut component = |current: i64, prior: i64| {
            let delta = current - prior;
            if delta < 0 {
                clamped = true;
                0
            } else {
                delta
            }
        };

        let deltas = Self {
            exec_count: component(row.exec_count, prev.exec_count),
            total_cpu_us: component(row.total_cpu_us, prev.total_cpu_us),
            total_duration_us: component(row.total_duration_us, prev.total_duration_us),
            total_logical_reads: component(row.total_logical_reads, prev.total_logical_reads),
            total_logical_writes: component(row.total_logical_writes, prev.total_logical_writes),
            total_physical_reads: component(row.total_physical_reads, prev.total_physical_reads),
        };

        if clamped {
            warn!(
                target_key = %target.key(),
                fingerprint_id,
                "cumulative counter decreased without an exec_count reset, clamped delta to 0"
            );
        }

        deltas
    }
}
