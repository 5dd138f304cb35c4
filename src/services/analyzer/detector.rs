//! Regression detector.
//!
//! Compares a recent aggregate against the active baseline under configured
//! threshold rules and classifies severity. Each metric is checked
//! independently; multiple triggers merge into one multi-metric finding.
//! A plan differing from the baseline's typical plan flags the finding, and
//! stands alone as a plan-change finding when no metric crossed its
//! threshold.

use crate::config::DetectorConfig;
use crate::models::{AggregatedRecent, QueryBaseline, RegressionType, Severity};

/// Severity classification bounds. Ratio is current/baseline; impact is in
/// work-units (metric-ms or reads, times executions).
const CRITICAL_RATIO: f64 = 10.0;
const HIGH_RATIO: f64 = 5.0;
const MEDIUM_RATIO: f64 = 3.0;
const CRITICAL_IMPACT: f64 = 1_000_000.0;
const HIGH_IMPACT: f64 = 100_000.0;
const MEDIUM_IMPACT: f64 = 10_000.0;

/// What the detector found for one fingerprint; the orchestrator turns this
/// into a persisted event.
#[derive(Debug, Clone)]
pub struct DetectorFinding {
    pub regression_type: RegressionType,
    pub metric_name: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub change_percent: f64,
    pub severity: Severity,
    pub is_plan_change: bool,
    pub baseline_plan_hash: Option<String>,
    pub current_plan_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegressionDetector {
    rules: DetectorConfig,
}

struct MetricCheck {
    regression_type: RegressionType,
    metric_name: &'static str,
    baseline_value: f64,
    current_value: f64,
    change_percent: f64,
    impact: f64,
}

impl RegressionDetector {
    pub fn new(rules: DetectorConfig) -> Self {
        Self { rules }
    }

    /// Evaluate one fingerprint. Returns at most one finding.
    pub fn evaluate(
        &self,
        baseline: &QueryBaseline,
        recent: &AggregatedRecent,
    ) -> Option<DetectorFinding> {
        if recent.total_executions < self.rules.minimum_executions {
            return None;
        }
        if baseline.sample_count < self.rules.minimum_baseline_samples {
            return None;
        }

        let plan_changed = match (&baseline.typical_plan_hash, &recent.current_plan_hash) {
            (Some(typical), Some(current)) => typical != current,
            _ => false,
        };

        let executions = recent.total_executions as f64;
        let checks = [
            check(
                RegressionType::Duration,
                "p95_duration_us",
                baseline.duration_p95_us,
                recent.p95_duration_us,
                executions,
                // microseconds scale to ms-based work-units
                1.0 / 1000.0,
            ),
            check(
                RegressionType::Cpu,
                "p95_cpu_us",
                baseline.cpu_p95_us,
                recent.p95_cpu_us,
                executions,
                1.0 / 1000.0,
            ),
            check(
                RegressionType::LogicalReads,
                "avg_logical_reads",
                baseline.logical_reads_p50,
                recent.avg_logical_reads,
                executions,
                1.0,
            ),
        ];

        let triggered: Vec<&MetricCheck> = checks
            .iter()
            .filter(|c| {
                let threshold = match c.regression_type {
                    RegressionType::Duration => self.rules.duration_threshold_percent,
                    RegressionType::Cpu => self.rules.cpu_threshold_percent,
                    _ => self.rules.logical_reads_threshold_percent,
                };
                c.baseline_value > 0.0 && c.change_percent >= threshold
            })
            .collect();

        if triggered.is_empty() {
            if plan_changed {
                // No metric regression: the plan delta itself is the finding.
                return Some(DetectorFinding {
                    regression_type: RegressionType::PlanChange,
                    metric_name: "plan_hash".to_string(),
                    baseline_value: 0.0,
                    current_value: 0.0,
                    change_percent: 0.0,
                    severity: Severity::Low,
                    is_plan_change: true,
                    baseline_plan_hash: baseline.typical_plan_hash.clone(),
                    current_plan_hash: recent.current_plan_hash.clone(),
                });
            }
            return None;
        }

        // Worst metric drives the reported values and severity.
        let worst = triggered
            .iter()
            .max_by(|a, b| a.change_percent.total_cmp(&b.change_percent))
            .copied()?;
        let max_impact = triggered
            .iter()
            .map(|c| c.impact)
            .fold(f64::NEG_INFINITY, f64::max);

        let regression_type = if triggered.len() > 1 {
            RegressionType::MultiMetric
        } else {
            worst.regression_type
        };

        let ratio = worst.current_value / worst.baseline_value;
        let severity = classify_severity(ratio, Some(max_impact));

        Some(DetectorFinding {
            regression_type,
            metric_name: worst.metric_name.to_string(),
            baseline_value: worst.baseline_value,
            current_value: worst.current_value,
            change_percent: worst.change_percent,
            severity,
            is_plan_change: plan_changed,
            baseline_plan_hash: baseline.typical_plan_hash.clone(),
            current_plan_hash: recent.current_plan_hash.clone(),
        })
    }
}

fn check(
    regression_type: RegressionType,
    metric_name: &'static str,
    baseline_value: f64,
    current_value: f64,
    executions: f64,
    unit_scale: f64,
) -> MetricCheck {
    let change_percent = if baseline_value > 0.0 {
        (current_value - baseline_value) / baseline_value * 100.0
    } else {
        0.0
    };
    let impact = ((current_value - baseline_value) * unit_scale * executions).max(0.0);
    MetricCheck {
        regression_type,
        metric_name,
        baseline_value,
        current_value,
        change_percent,
        impact,
    }
}

/// Worst of the ratio-based and impact-based classifications.
pub fn classify_severity(ratio: f64, impact: Option<f64>) -> Severity {
    let by_ratio = if ratio >= CRITICAL_RATIO {
        Severity::Critical
    } else if ratio >= HIGH_RATIO {
        Severity::High
    } else if ratio >= MEDIUM_RATIO {
        Severity::Medium
    } else {
        Severity::Low
    };

    let by_impact = match impact {
        Some(i) if i >= CRITICAL_IMPACT => Severity::Critical,
        Some(i) if i >= HIGH_IMPACT => Severity::High,
        Some(i) if i >= MEDIUM_IMPACT => Severity::Medium,
        _ => Severity::Low,
    };

    by_ratio.max(by_impact)
}
