//! End-to-end collection pipeline: scripted source through fingerprinting,
//! delta computation and persistence, including bootstrap, steady-state,
//! reset and failure-isolation behavior.

use super::common::{ScriptedSource, observed, stores, test_config};
use crate::models::Target;
use crate::services::CollectionService;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const TARGETS: &str = r#"
    [[targets]]
    name = "i1"
    host = "db1.internal"
    username = "monitor"

    [[targets.databases]]
    name = "d1"

    [[targets]]
    name = "i2"
    host = "db2.internal"
    username = "monitor"

    [[targets.databases]]
    name = "d2"
"#;

fn service(
    source: Arc<ScriptedSource>,
    stores: &super::common::Stores,
) -> CollectionService {
    CollectionService::new(
        source,
        stores.fingerprints.clone(),
        stores.snapshots.clone(),
        stores.samples.clone(),
    )
}

#[tokio::test]
async fn test_bootstrap_then_delta_then_reset() {
    let stores = stores().await;
    let source = Arc::new(ScriptedSource::new());
    let config = test_config(TARGETS);
    let target = Target::new("i1", "d1");
    let sql = "SELECT * FROM orders WHERE id = 7";

    // Cycle 1: bootstrap. Cycle 2: counters grew. Cycle 3: counter reset.
    source.push(&target, vec![observed(sql, 1000, 2_000_000)]);
    source.push(&target, vec![observed(sql, 1500, 3_500_000)]);
    source.push(&target, vec![observed(sql, 200, 100_000)]);

    let service = service(source, &stores);
    let only_first_target: Vec<Target> = config
        .enabled_targets()
        .into_iter()
        .filter(|t| t.instance_name == "i1")
        .collect();

    for _ in 0..3 {
        let summary = service
            .run_cycle(&config, only_first_target.clone(), Arc::new(AtomicBool::new(false)))
            .await;
        assert!(summary.is_full_success());
    }

    let fingerprint = stores
        .fingerprints
        .get_by_hash(&crate::services::fingerprint::fingerprint(sql).hash)
        .await
        .unwrap()
        .expect("fingerprint registered");

    let now = chrono::Utc::now();
    let samples = stores
        .samples
        .get_for_fingerprint(
            fingerprint.id,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
    assert_eq!(samples.len(), 3);

    // Bootstrap: deltas equal cumulative totals
    assert_eq!(samples[0].exec_count_delta, 1000);
    assert_eq!(samples[0].avg_cpu_us, 2000.0);
    // Steady state: componentwise difference
    assert_eq!(samples[1].exec_count_delta, 500);
    assert_eq!(samples[1].total_cpu_us_delta, 1_500_000);
    // Reset: deltas equal the new cumulative values
    assert_eq!(samples[2].exec_count_delta, 200);
    assert_eq!(samples[2].total_cpu_us_delta, 100_000);

    // Snapshot reflects the post-reset observation
    let snapshot = stores
        .snapshots
        .get_last(&target, fingerprint.id, None)
        .await
        .unwrap()
        .expect("snapshot kept");
    assert_eq!(snapshot.exec_count, 200);
}

#[tokio::test]
async fn test_equivalent_sql_aggregates_to_one_fingerprint() {
    let stores = stores().await;
    let source = Arc::new(ScriptedSource::new());
    let config = test_config(TARGETS);
    let target = Target::new("i1", "d1");

    source.push(
        &target,
        vec![
            observed("SELECT * FROM T WHERE id = 1", 10, 1000),
            observed("select *  from  T  where  id = 42", 10, 1000),
        ],
    );

    let service = service(source, &stores);
    let targets: Vec<Target> = config
        .enabled_targets()
        .into_iter()
        .filter(|t| t.instance_name == "i1")
        .collect();
    let summary = service
        .run_cycle(&config, targets, Arc::new(AtomicBool::new(false)))
        .await;

    assert!(summary.is_full_success());
    assert_eq!(stores.fingerprints.count().await.unwrap(), 1);
    // Both rows still produced samples against the shared fingerprint
    assert_eq!(summary.samples_written, 2);
}

#[tokio::test]
async fn test_target_failure_is_isolated() {
    let stores = stores().await;
    let source = Arc::new(ScriptedSource::new());
    let config = test_config(TARGETS);
    let bad = Target::new("i1", "d1");
    let good = Target::new("i2", "d2");

    source.push_error(&bad);
    source.push(&good, vec![observed("SELECT 1 FROM t", 5, 500)]);

    let service = service(source, &stores);
    let summary = service
        .run_cycle(&config, config.enabled_targets(), Arc::new(AtomicBool::new(false)))
        .await;

    assert_eq!(summary.targets_total, 2);
    assert_eq!(summary.targets_failed, 1);
    assert_eq!(summary.targets_succeeded, 1);
    assert!(!summary.is_full_success());
    assert_eq!(summary.samples_written, 1);

    let failed_instance = summary
        .instances
        .iter()
        .find(|i| i.instance_name == "i1")
        .unwrap();
    assert!(failed_instance.connect_error.is_some());
}

#[tokio::test]
async fn test_minimum_execution_count_filters_rows() {
    let stores = stores().await;
    let source = Arc::new(ScriptedSource::new());
    let mut config = test_config(TARGETS);
    config.collection.minimum_execution_count = 10;
    let target = Target::new("i1", "d1");

    source.push(
        &target,
        vec![
            observed("SELECT a FROM t1", 50, 1000),
            observed("SELECT b FROM t2", 3, 1000),
        ],
    );

    let service = service(source, &stores);
    let targets: Vec<Target> = config
        .enabled_targets()
        .into_iter()
        .filter(|t| t.instance_name == "i1")
        .collect();
    let summary = service
        .run_cycle(&config, targets, Arc::new(AtomicBool::new(false)))
        .await;

    assert_eq!(summary.samples_written, 1);
    assert_eq!(stores.fingerprints.count().await.unwrap(), 1);
}
