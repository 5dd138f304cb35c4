//! Hotspot detector.
//!
//! Ranks fingerprints by their share of one resource over the recent window.
//! Purely arithmetic over window samples; no persistence. Ties break by
//! execution count, then by fingerprint id for a stable order.

use crate::models::{Hotspot, QuerySample, RankingMetric, Target};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HotspotDetector {
    metric: RankingMetric,
    top_n: usize,
}

struct FingerprintTotals {
    total: f64,
    execs: i64,
}

impl HotspotDetector {
    pub fn new(metric: RankingMetric, top_n: usize) -> Self {
        Self { metric, top_n }
    }

    /// Rank the window's samples. `samples` must all belong to `target`.
    pub fn rank(
        &self,
        target: &Target,
        window_start_utc: DateTime<Utc>,
        window_end_utc: DateTime<Utc>,
        samples: &[QuerySample],
    ) -> Vec<Hotspot> {
        let mut totals: HashMap<i64, FingerprintTotals> = HashMap::new();
        for sample in samples {
            let value = self.metric_value(sample);
            let entry = totals
                .entry(sample.fingerprint_id)
                .or_insert(FingerprintTotals { total: 0.0, execs: 0 });
            entry.total += value;
            entry.execs += sample.exec_count_delta;
        }

        let grand_total: f64 = totals.values().map(|t| t.total).sum();

        let mut ranked: Vec<(i64, FingerprintTotals)> = totals.into_iter().collect();
        ranked.sort_by(|(id_a, a), (id_b, b)| {
            b.total
                .total_cmp(&a.total)
                .then(b.execs.cmp(&a.execs))
                .then(id_a.cmp(id_b))
        });

        ranked
            .into_iter()
            .take(self.top_n)
            .enumerate()
            .map(|(idx, (fingerprint_id, t))| Hotspot {
                fingerprint_id,
                instance_name: target.instance_name.clone(),
                database_name: target.database_name.clone(),
                window_start_utc,
                window_end_utc,
                rank: idx + 1,
                metric_type: self.metric,
                total_metric_value: t.total,
                avg_metric_value: t.total / t.execs.max(1) as f64,
                exec_count: t.execs,
                percentage_of_total: if grand_total > 0.0 { t.total / grand_total } else { 0.0 },
            })
            .collect()
    }

    fn metric_value(&self, sample: &QuerySample) -> f64 {
        match self.metric {
            RankingMetric::Cpu => sample.total_cpu_us_delta as f64,
            RankingMetric::Duration => sample.total_duration_us_delta as f64,
            RankingMetric::LogicalReads => {
                sample.avg_logical_reads * sample.exec_count_delta as f64
            },
            RankingMetric::Executions => sample.exec_count_delta as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(fingerprint_id: i64, cpu_delta: i64, execs: i64) -> QuerySample {
        QuerySample {
            id: 0,
            fingerprint_id,
            instance_name: "i1".into(),
            database_name: "d1".into(),
            sampled_at_utc: Utc::now(),
            plan_hash: None,
            exec_count_delta: execs,
            total_cpu_us_delta: cpu_delta,
            avg_cpu_us: cpu_delta as f64 / execs.max(1) as f64,
            min_cpu_us: None,
            max_cpu_us: None,
            total_duration_us_delta: cpu_delta * 2,
            avg_duration_us: 0.0,
            min_duration_us: None,
            max_duration_us: None,
            avg_logical_reads: 10.0,
            avg_logical_writes: 0.0,
            avg_physical_reads: 0.0,
            avg_memory_grant_kb: None,
            avg_spills_kb: None,
        }
    }

    #[test]
    fn test_ranking_and_share() {
        let detector = HotspotDetector::new(RankingMetric::Cpu, 2);
        let target = Target::new("i1", "d1");
        let now = Utc::now();

        let samples = vec![
            sample(1, 100, 10),
            sample(1, 200, 10), // fingerprint 1 total: 300
            sample(2, 600, 5),  // fingerprint 2 total: 600
            sample(3, 100, 1),  // fingerprint 3 total: 100
        ];

        let hotspots = detector.rank(&target, now, now, &samples);
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].fingerprint_id, 2);
        assert_eq!(hotspots[0].rank, 1);
        assert!((hotspots[0].percentage_of_total - 0.6).abs() < 1e-9);
        assert_eq!(hotspots[1].fingerprint_id, 1);
        assert!((hotspots[1].percentage_of_total - 0.3).abs() < 1e-9);

        let shares: f64 = hotspots.iter().map(|h| h.percentage_of_total).sum();
        assert!(shares <= 1.0 + 1e-9);
    }

    #[test]
    fn test_ties_break_by_execs_then_id() {
        let detector = HotspotDetector::new(RankingMetric::Cpu, 10);
        let target = Target::new("i1", "d1");
        let now = Utc::now();

        let samples = vec![
            sample(5, 100, 1),
            sample(3, 100, 9),
            sample(4, 100, 9),
        ];

        let hotspots = detector.rank(&target, now, now, &samples);
        let order: Vec<i64> = hotspots.iter().map(|h| h.fingerprint_id).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn test_empty_window() {
        let detector = HotspotDetector::new(RankingMetric::Executions, 5);
        let target = Target::new("i1", "d1");
        let now = Utc::now();
        assert!(detector.rank(&target, now, now, &[]).is_empty());
    }
}
