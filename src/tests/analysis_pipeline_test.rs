//! End-to-end analysis pipeline: stored samples and baselines through the
//! detector, event persistence, deduplication and escalation.

use super::common::stores;
use crate::config::DetectorConfig;
use crate::models::{
    EventStatus, QueryBaseline, QuerySample, RankingMetric, RegressionType, Severity, Target,
};
use crate::services::AnalysisService;
use crate::services::analyzer::baseline::BaselineBuilder;
use crate::services::analyzer::detector::RegressionDetector;
use crate::services::analyzer::hotspot::HotspotDetector;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn analysis(stores: &super::common::Stores) -> AnalysisService {
    AnalysisService::new(
        stores.samples.clone(),
        stores.baselines.clone(),
        stores.events.clone(),
        stores.fingerprints.clone(),
        RegressionDetector::new(DetectorConfig::default()),
        HotspotDetector::new(RankingMetric::Cpu, 5),
        BaselineBuilder::new(stores.samples.clone(), stores.baselines.clone(), 10),
    )
}

fn stored_baseline(fingerprint_id: i64, p95_duration_us: f64) -> QueryBaseline {
    let now = Utc::now();
    QueryBaseline {
        id: 0,
        fingerprint_id,
        window_start_utc: now - Duration::days(7),
        window_end_utc: now,
        sample_count: 20,
        total_executions: 2000,
        duration_p50_us: p95_duration_us / 2.0,
        duration_p95_us: p95_duration_us,
        duration_p99_us: p95_duration_us * 1.2,
        cpu_p50_us: 1_000_000.0,
        cpu_p95_us: 2_000_000.0,
        logical_reads_p50: 100.0,
        logical_reads_p95: 200.0,
        duration_stddev_us: 10_000.0,
        typical_plan_hash: None,
        is_active: true,
        superseded_at_utc: None,
    }
}

fn recent_sample(fingerprint_id: i64, avg_duration_us: f64, execs: i64) -> QuerySample {
    QuerySample {
        id: 0,
        fingerprint_id,
        instance_name: "i1".into(),
        database_name: "d1".into(),
        sampled_at_utc: Utc::now() - Duration::minutes(5),
        plan_hash: None,
        exec_count_delta: execs,
        total_cpu_us_delta: 1000,
        avg_cpu_us: 1_000_000.0,
        min_cpu_us: None,
        max_cpu_us: None,
        total_duration_us_delta: (avg_duration_us * execs as f64) as i64,
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

#[tokio::test]
async fn test_duration_regression_end_to_end() {
    let stores = stores().await;
    let service = analysis(&stores);
    let target = Target::new("i1", "d1");

    stores.baselines.save(&stored_baseline(1, 1_000_000.0)).await.unwrap();
    // Ten recent samples at 1.6M us, one execution each: change 60%, ratio
    // 1.6x, impact 600ms * 10 = 6000 work-units, both below medium bounds
    let samples: Vec<QuerySample> =
        (0..10).map(|_| recent_sample(1, 1_600_000.0, 1)).collect();
    stores.samples.append(&samples).await.unwrap();

    let output = service
        .run_cycle(&[target.clone()], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;

    assert_eq!(output.summary.events_created, 1);
    let event = &output.new_events[0];
    assert_eq!(event.regression_type, RegressionType::Duration);
    assert_eq!(event.metric_name, "p95_duration_us");
    assert_eq!(event.baseline_value, 1_000_000.0);
    assert_eq!(event.current_value, 1_600_000.0);
    assert!((event.change_percent - 60.0).abs() < 1e-9);
    assert_eq!(event.severity, Severity::Low);
    assert_eq!(event.status, EventStatus::New);

    // Hotspots are computed on the same window data
    assert!(!output.hotspots.is_empty());
    assert_eq!(output.hotspots[0].fingerprint_id, 1);
}

#[tokio::test]
async fn test_open_event_deduplication_and_escalation() {
    let stores = stores().await;
    let service = analysis(&stores);
    let target = Target::new("i1", "d1");

    stores.baselines.save(&stored_baseline(1, 1_000_000.0)).await.unwrap();
    stores
        .samples
        .append(&(0..10).map(|_| recent_sample(1, 1_600_000.0, 1)).collect::<Vec<_>>())
        .await
        .unwrap();

    let first = service
        .run_cycle(&[target.clone()], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(first.summary.events_created, 1);
    let event_id = first.new_events[0].id.clone();

    // Same severity again: suppressed as duplicate
    let second = service
        .run_cycle(&[target.clone()], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(second.summary.events_created, 0);

    // Much worse numbers: the open event escalates instead of duplicating
    stores
        .samples
        .append(&(0..10).map(|_| recent_sample(1, 12_000_000.0, 50)).collect::<Vec<_>>())
        .await
        .unwrap();
    let third = service
        .run_cycle(&[target.clone()], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(third.summary.events_created, 0);
    assert_eq!(third.summary.targets[0].events_escalated, 1);

    let event = stores.events.get(&event_id).await.unwrap().unwrap();
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(event.status, EventStatus::New);

    // A resolved event no longer suppresses new detections
    stores.events.resolve(&event_id, "ops", None).await.unwrap();
    let fourth = service
        .run_cycle(&[target], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(fourth.summary.events_created, 1);
}

#[tokio::test]
async fn test_no_baseline_means_no_event() {
    let stores = stores().await;
    let service = analysis(&stores);
    let target = Target::new("i1", "d1");

    stores
        .samples
        .append(&(0..10).map(|_| recent_sample(1, 9_000_000.0, 10)).collect::<Vec<_>>())
        .await
        .unwrap();

    let output = service
        .run_cycle(&[target], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(output.summary.events_created, 0);
    assert!(output.new_events.is_empty());
}

#[tokio::test]
async fn test_rebuild_then_detect_round_trip() {
    let stores = stores().await;
    let service = analysis(&stores);
    let target = Target::new("i1", "d1");

    // A week of healthy history at ~1s per execution
    let history: Vec<QuerySample> = (0..24)
        .map(|i| {
            let mut s = recent_sample(1, 1_000_000.0 + (i % 5) as f64 * 1000.0, 10);
            s.sampled_at_utc = Utc::now() - Duration::hours(2 + i);
            s
        })
        .collect();
    stores.samples.append(&history).await.unwrap();

    let rebuild = service
        .rebuild_for_targets(&[target.clone()], Duration::days(7), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(rebuild.built, 1);

    // Recent regression on top of the learned baseline
    stores
        .samples
        .append(&(0..10).map(|_| recent_sample(1, 1_700_000.0, 1)).collect::<Vec<_>>())
        .await
        .unwrap();

    let output = service
        .run_cycle(&[target], Duration::hours(1), Arc::new(AtomicBool::new(false)))
        .await;
    assert_eq!(output.summary.events_created, 1);
    assert_eq!(output.new_events[0].regression_type, RegressionType::Duration);
}
