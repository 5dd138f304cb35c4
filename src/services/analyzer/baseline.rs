//! Baseline builder.
//!
//! Aggregates a fingerprint's historical samples into a percentile summary.
//! Percentiles are linear interpolation between order statistics, computed
//! per-sample (not weighted by executions), and never aggregated across
//! fingerprints. Building refuses below a minimum sample count rather than
//! producing a low-confidence baseline.

use crate::models::{QueryBaseline, QuerySample};
use crate::services::store::{BaselineRepo, SampleStore};
use crate::utils::MonitorResult;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug)]
pub enum BuildOutcome {
    Built(QueryBaseline),
    InsufficientSamples { found: usize, required: usize },
}

#[derive(Clone)]
pub struct BaselineBuilder {
    samples: SampleStore,
    baselines: BaselineRepo,
    min_samples: usize,
}

impl BaselineBuilder {
    pub fn new(samples: SampleStore, baselines: BaselineRepo, min_samples: usize) -> Self {
        Self { samples, baselines, min_samples }
    }

    /// Build and persist a baseline over `[now - lookback, now]`, superseding
    /// any active baseline for the fingerprint in the same transaction.
    pub async fn rebuild(
        &self,
        fingerprint_id: i64,
        lookback: Duration,
    ) -> MonitorResult<BuildOutcome> {
        let window_end = Utc::now();
        let window_start = window_end - lookback;

        let samples = self
            .samples
            .get_for_fingerprint(fingerprint_id, window_start, window_end)
            .await?;

        if samples.len() < self.min_samples {
            debug!(
                fingerprint_id,
                found = samples.len(),
                required = self.min_samples,
                "not enough samples for baseline"
            );
            return Ok(BuildOutcome::InsufficientSamples {
                found: samples.len(),
                required: self.min_samples,
            });
        }

        let baseline = compute_baseline(fingerprint_id, window_start, window_end, &samples);
        let id = self.baselines.save(&baseline).await?;
        info!(
            fingerprint_id,
            baseline_id = id,
            sample_count = baseline.sample_count,
            p95_duration_us = baseline.duration_p95_us,
            "baseline rebuilt"
        );

        Ok(BuildOutcome::Built(QueryBaseline { id, ..baseline }))
    }
}

/// Pure aggregation: samples in, baseline row out.
pub fn compute_baseline(
    fingerprint_id: i64,
    window_start_utc: DateTime<Utc>,
    window_end_utc: DateTime<Utc>,
    samples: &[QuerySample],
) -> QueryBaseline {
    let mut durations: Vec<f64> = samples.iter().map(|s| s.avg_duration_us).collect();
    let mut cpus: Vec<f64> = samples.iter().map(|s| s.avg_cpu_us).collect();
    let mut reads: Vec<f64> = samples.iter().map(|s| s.avg_logical_reads).collect();
    durations.sort_by(|a, b| a.total_cmp(b));
    cpus.sort_by(|a, b| a.total_cmp(b));
    reads.sort_by(|a, b| a.total_cmp(b));

    QueryBaseline {
        id: 0,
        fingerprint_id,
        window_start_utc,
        window_end_utc,
        sample_count: samples.len() as i64,
        total_executions: samples.iter().map(|s| s.exec_count_delta).sum(),
        duration_p50_us: percentile(&durations, 50.0),
        duration_p95_us: percentile(&durations, 95.0),
        duration_p99_us: percentile(&durations, 99.0),
        cpu_p50_us: percentile(&cpus, 50.0),
        cpu_p95_us: percentile(&cpus, 95.0),
        logical_reads_p50: percentile(&reads, 50.0),
        logical_reads_p95: percentile(&reads, 95.0),
        duration_stddev_us: stddev(&durations),
        typical_plan_hash: typical_plan_hash(samples),
        is_active: true,
        superseded_at_utc: None,
    }
}

/// Linear interpolation between order statistics. `sorted` must be ascending.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// The plan hash carrying the largest share of executions in the window.
/// Ties break toward the plan seen most recently.
fn typical_plan_hash(samples: &[QuerySample]) -> Option<String> {
    let mut by_plan: HashMap<&str, (i64, DateTime<Utc>)> = HashMap::new();
    for sample in samples {
        let Some(plan) = sample.plan_hash.as_deref() else {
            continue;
        };
        let entry = by_plan.entry(plan).or_insert((0, sample.sampled_at_utc));
        entry.0 += sample.exec_count_delta;
        if sample.sampled_at_utc > entry.1 {
            entry.1 = sample.sampled_at_utc;
        }
    }

    by_plan
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then(a.1.1.cmp(&b.1.1)))
        .map(|(plan, _)| plan.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::SqlitePool;

    fn sample(avg_duration_us: f64, plan: Option<&str>, execs: i64) -> QuerySample {
        QuerySample {
            id: 0,
            fingerprint_id: 1,
            instance_name: "i1".into(),
            database_name: "d1".into(),
            sampled_at_utc: Utc::now(),
            plan_hash: plan.map(String::from),
            exec_count_delta: execs,
            total_cpu_us_delta: 0,
            avg_cpu_us: avg_duration_us / 2.0,
            min_cpu_us: None,
            max_cpu_us: None,
            total_duration_us_delta: 0,
            avg_duration_us,
            min_duration_us: None,
            max_duration_us: None,
            avg_logical_reads: 100.0,
            avg_logical_writes: 0.0,
            avg_physical_reads: 0.0,
            avg_memory_grant_kb: None,
            avg_spills_kb: None,
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
        assert_eq!(percentile(&values, 50.0), 25.0);
        // rank 2.85 -> 30 + 0.85 * 10
        assert!((percentile(&values, 95.0) - 38.5).abs() < 1e-9);
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn test_typical_plan_by_execution_share() {
        let samples = vec![
            sample(100.0, Some("0xA"), 10),
            sample(100.0, Some("0xB"), 500),
            sample(100.0, Some("0xA"), 20),
            sample(100.0, None, 9999),
        ];
        assert_eq!(typical_plan_hash(&samples).as_deref(), Some("0xB"));
        assert_eq!(typical_plan_hash(&[sample(1.0, None, 5)]), None);
    }

    #[test]
    fn test_compute_baseline_stats() {
        let samples: Vec<QuerySample> =
            (1..=10).map(|i| sample(i as f64 * 100.0, None, 10)).collect();
        let now = Utc::now();
        let baseline = compute_baseline(1, now - Duration::days(7), now, &samples);

        assert_eq!(baseline.sample_count, 10);
        assert_eq!(baseline.total_executions, 100);
        assert_eq!(baseline.duration_p50_us, 550.0);
        assert!(baseline.duration_p95_us > baseline.duration_p50_us);
        assert!(baseline.duration_p99_us >= baseline.duration_p95_us);
        assert!(baseline.duration_stddev_us > 0.0);
    }

    #[tokio::test]
    async fn test_rebuild_refuses_below_min_samples() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let samples = SampleStore::new(pool.clone());
        let baselines = BaselineRepo::new(pool);
        let builder = BaselineBuilder::new(samples.clone(), baselines.clone(), 10);

        samples
            .append(&(0..5).map(|_| sample(100.0, None, 10)).collect::<Vec<_>>())
            .await
            .unwrap();

        match builder.rebuild(1, Duration::days(7)).await.unwrap() {
            BuildOutcome::InsufficientSamples { found, required } => {
                assert_eq!(found, 5);
                assert_eq!(required, 10);
            },
            BuildOutcome::Built(_) => panic!("should refuse to build"),
        }
        assert!(baselines.get_active(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_supersedes_atomically() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let samples = SampleStore::new(pool.clone());
        let baselines = BaselineRepo::new(pool);
        let builder = BaselineBuilder::new(samples.clone(), baselines.clone(), 10);

        samples
            .append(&(0..12).map(|i| sample(100.0 + i as f64, None, 10)).collect::<Vec<_>>())
            .await
            .unwrap();

        for _ in 0..3 {
            match builder.rebuild(1, Duration::days(7)).await.unwrap() {
                BuildOutcome::Built(_) => {},
                other => panic!("expected build, got {:?}", other),
            }
        }
        assert_eq!(baselines.active_count(1).await.unwrap(), 1);
    }
}
