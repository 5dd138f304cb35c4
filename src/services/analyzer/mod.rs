//! Analysis orchestrator.
//!
//! Drives the baseline builder, regression detector and hotspot ranking for
//! each target over the recent window, persisting events with
//! open-event deduplication. Detection never blocks on alerting; callers
//! dispatch the returned events and hotspots.

pub mod baseline;
pub mod detector;
pub mod hotspot;

use crate::models::{
    AggregatedRecent, AnalysisRunSummary, Hotspot, RegressionEvent, EventStatus, Target,
    TargetAnalysisResult,
};
use crate::services::analyzer::baseline::{BaselineBuilder, BuildOutcome, percentile};
use crate::services::analyzer::detector::{DetectorFinding, RegressionDetector};
use crate::services::analyzer::hotspot::HotspotDetector;
use crate::services::store::{BaselineRepo, EventRepo, FingerprintRepo, SampleStore};
use crate::utils::MonitorResult;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one analysis tick produced, for the alert and remediation stages.
#[derive(Debug)]
pub struct AnalysisOutput {
    pub summary: AnalysisRunSummary,
    pub new_events: Vec<RegressionEvent>,
    pub hotspots: Vec<Hotspot>,
}

/// Counts from one baseline rebuild pass.
#[derive(Debug, Default)]
pub struct RebuildOutcome {
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AnalysisService {
    samples: SampleStore,
    baselines: BaselineRepo,
    events: EventRepo,
    fingerprints: FingerprintRepo,
    detector: RegressionDetector,
    hotspots: HotspotDetector,
    builder: BaselineBuilder,
}

impl AnalysisService {
    pub fn new(
        samples: SampleStore,
        baselines: BaselineRepo,
        events: EventRepo,
        fingerprints: FingerprintRepo,
        detector: RegressionDetector,
        hotspots: HotspotDetector,
        builder: BaselineBuilder,
    ) -> Self {
        Self { samples, baselines, events, fingerprints, detector, hotspots, builder }
    }

    /// Run one analysis cycle over the given targets.
    pub async fn run_cycle(
        &self,
        targets: &[Target],
        recent_window: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> AnalysisOutput {
        let started_at_utc = Utc::now();
        let window_start = started_at_utc - recent_window;

        let mut results = Vec::with_capacity(targets.len());
        let mut new_events = Vec::new();
        let mut all_hotspots = Vec::new();

        for target in targets {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self
                .analyze_target(target, window_start, started_at_utc, &mut new_events)
                .await
            {
                Ok((result, hotspots)) => {
                    all_hotspots.extend(hotspots);
                    results.push(result);
                },
                Err(e) => {
                    warn!(target_key = %target.key(), error = %e, "target analysis failed");
                    results.push(TargetAnalysisResult {
                        instance_name: target.instance_name.clone(),
                        database_name: target.database_name.clone(),
                        success: false,
                        fingerprints_analyzed: 0,
                        events_created: 0,
                        events_escalated: 0,
                        hotspots_found: 0,
                        error: Some(e.to_string()),
                    });
                },
            }
        }

        let targets_failed = results.iter().filter(|r| !r.success).count();
        let events_created = results.iter().map(|r| r.events_created).sum();
        let summary = AnalysisRunSummary {
            started_at_utc,
            finished_at_utc: Utc::now(),
            targets_total: results.len(),
            targets_failed,
            events_created,
            targets: results,
        };

        info!(
            targets = summary.targets_total,
            failed = summary.targets_failed,
            events = summary.events_created,
            hotspots = all_hotspots.len(),
            "analysis cycle finished"
        );

        AnalysisOutput { summary, new_events, hotspots: all_hotspots }
    }

    async fn analyze_target(
        &self,
        target: &Target,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        new_events: &mut Vec<RegressionEvent>,
    ) -> MonitorResult<(TargetAnalysisResult, Vec<Hotspot>)> {
        let fingerprint_ids = self
            .samples
            .fingerprint_ids_in_window(target, window_start, window_end)
            .await?;

        let mut events_created = 0usize;
        let mut events_escalated = 0usize;

        for fingerprint_id in &fingerprint_ids {
            let Some(baseline) = self.baselines.get_active(*fingerprint_id).await? else {
                continue;
            };

            let window_samples = self
                .samples
                .get_for_fingerprint(*fingerprint_id, window_start, window_end)
                .await?;
            let recent = aggregate_recent(&window_samples);

            let Some(finding) = self.detector.evaluate(&baseline, &recent) else {
                continue;
            };

            match self.persist_finding(target, *fingerprint_id, finding).await? {
                PersistOutcome::Created(event) => {
                    events_created += 1;
                    new_events.push(event);
                },
                PersistOutcome::Escalated => events_escalated += 1,
                PersistOutcome::Duplicate => {},
            }
        }

        let target_samples = self
            .samples
            .get_for_target(target, window_start, window_end)
            .await?;
        let hotspots = self
            .hotspots
            .rank(target, window_start, window_end, &target_samples);

        Ok((
            TargetAnalysisResult {
                instance_name: target.instance_name.clone(),
                database_name: target.database_name.clone(),
                success: true,
                fingerprints_analyzed: fingerprint_ids.len(),
                events_created,
                events_escalated,
                hotspots_found: hotspots.len(),
                error: None,
            },
            hotspots,
        ))
    }

    /// Apply the open-event deduplication rule before persisting: an open
    /// event for the same (fingerprint, type) suppresses a new row, but its
    /// numbers escalate when severity increased.
    async fn persist_finding(
        &self,
        target: &Target,
        fingerprint_id: i64,
        finding: DetectorFinding,
    ) -> MonitorResult<PersistOutcome> {
        let open = self.events.get_active_by_fingerprint(fingerprint_id).await?;
        if let Some(existing) = open
            .iter()
            .find(|e| e.regression_type == finding.regression_type)
        {
            if finding.severity > existing.severity {
                self.events
                    .escalate(
                        &existing.id,
                        finding.current_value,
                        finding.change_percent,
                        finding.severity,
                    )
                    .await?;
                debug!(
                    event_id = %existing.id,
                    severity = finding.severity.as_str(),
                    "escalated open event"
                );
                return Ok(PersistOutcome::Escalated);
            }
            return Ok(PersistOutcome::Duplicate);
        }

        let event = RegressionEvent {
            id: Uuid::new_v4().to_string(),
            fingerprint_id,
            instance_name: target.instance_name.clone(),
            database_name: target.database_name.clone(),
            detected_at_utc: Utc::now(),
            regression_type: finding.regression_type,
            metric_name: finding.metric_name,
            baseline_value: finding.baseline_value,
            current_value: finding.current_value,
            change_percent: finding.change_percent,
            severity: finding.severity,
            is_plan_change: finding.is_plan_change,
            baseline_plan_hash: finding.baseline_plan_hash,
            current_plan_hash: finding.current_plan_hash,
            status: EventStatus::New,
            acknowledged_by: None,
            acknowledged_at_utc: None,
            resolved_by: None,
            resolved_at_utc: None,
            notes: None,
        };
        self.events.save(&event).await?;
        Ok(PersistOutcome::Created(event))
    }

    /// Rebuild baselines for every known fingerprint. Fingerprints without
    /// enough samples in the lookback are skipped, not failed.
    pub async fn rebuild_all_baselines(
        &self,
        lookback: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> MonitorResult<RebuildOutcome> {
        let stale = self.baselines.get_stale(lookback).await?;
        if !stale.is_empty() {
            info!(count = stale.len(), "active baselines older than the lookback window");
        }

        let ids = self.fingerprints.all_ids().await?;
        self.rebuild_fingerprints(ids, lookback, shutdown).await
    }

    /// Rebuild baselines only for fingerprints that produced samples on the
    /// given targets inside the lookback (the `rebuild-baselines` selector).
    pub async fn rebuild_for_targets(
        &self,
        targets: &[Target],
        lookback: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> MonitorResult<RebuildOutcome> {
        let now = Utc::now();
        let mut ids = std::collections::BTreeSet::new();
        for target in targets {
            for id in self
                .samples
                .fingerprint_ids_in_window(target, now - lookback, now)
                .await?
            {
                ids.insert(id);
            }
        }
        self.rebuild_fingerprints(ids.into_iter().collect(), lookback, shutdown)
            .await
    }

    async fn rebuild_fingerprints(
        &self,
        ids: Vec<i64>,
        lookback: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> MonitorResult<RebuildOutcome> {
        let mut outcome = RebuildOutcome::default();

        for fingerprint_id in ids {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.builder.rebuild(fingerprint_id, lookback).await {
                Ok(BuildOutcome::Built(_)) => outcome.built += 1,
                Ok(BuildOutcome::InsufficientSamples { .. }) => outcome.skipped += 1,
                Err(e) => {
                    warn!(fingerprint_id, error = %e, "baseline rebuild failed");
                    outcome.failed += 1;
                },
            }
        }

        info!(
            built = outcome.built,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "baseline rebuild pass finished"
        );
        Ok(outcome)
    }

    /// Hotspot ranking over an arbitrary window, used by the daily summary.
    pub async fn window_hotspots(
        &self,
        targets: &[Target],
        window: Duration,
    ) -> MonitorResult<Vec<Hotspot>> {
        let window_end = Utc::now();
        let window_start = window_end - window;
        let mut all = Vec::new();
        for target in targets {
            let samples = self
                .samples
                .get_for_target(target, window_start, window_end)
                .await?;
            all.extend(self.hotspots.rank(target, window_start, window_end, &samples));
        }
        all.sort_by(|a, b| b.total_metric_value.total_cmp(&a.total_metric_value));
        Ok(all)
    }
}

enum PersistOutcome {
    Created(RegressionEvent),
    Escalated,
    Duplicate,
}

/// Collapse window samples into the aggregate the detector compares.
pub fn aggregate_recent(samples: &[crate::models::QuerySample]) -> AggregatedRecent {
    if samples.is_empty() {
        return AggregatedRecent::default();
    }

    let mut durations: Vec<f64> = samples.iter().map(|s| s.avg_duration_us).collect();
    let mut cpus: Vec<f64> = samples.iter().map(|s| s.avg_cpu_us).collect();
    durations.sort_by(|a, b| a.total_cmp(b));
    cpus.sort_by(|a, b| a.total_cmp(b));

    let avg_logical_reads =
        samples.iter().map(|s| s.avg_logical_reads).sum::<f64>() / samples.len() as f64;

    // Plan hash of the most recent sample that carries one
    let current_plan_hash = samples
        .iter()
        .filter(|s| s.plan_hash.is_some())
        .max_by_key(|s| s.sampled_at_utc)
        .and_then(|s| s.plan_hash.clone());

    AggregatedRecent {
        sample_count: samples.len() as i64,
        total_executions: samples.iter().map(|s| s.exec_count_delta).sum(),
        p95_duration_us: percentile(&durations, 95.0),
        p95_cpu_us: percentile(&cpus, 95.0),
        avg_logical_reads,
        current_plan_hash,
    }
}
