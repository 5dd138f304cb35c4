//! Collection orchestrator.
//!
//! One tick: snapshot the enabled-target list, fan out over targets under a
//! parallelism bound, and for each target run fetch -> fingerprint ->
//! delta -> append sample -> upsert snapshot. Failures isolate per target;
//! the cycle always completes and reports them in the run summary.

pub mod delta;

use crate::config::Config;
use crate::models::{
    CollectionRunSummary, InstanceCollectionResult, Target, TargetCollectionResult,
};
use crate::services::collector::delta::DeltaEngine;
use crate::services::stats_source::{CostOrder, StatsSource};
use crate::services::store::{FingerprintRepo, SampleStore, SnapshotStore};
use crate::services::fingerprint;
use crate::utils::{MonitorError, MonitorResult};
use chrono::{Duration, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Per-cycle settings snapshotted from configuration at tick start.
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub parallelism: usize,
    pub order_by: CostOrder,
    pub retention_days: i64,
    pub continue_on_database_error: bool,
    pub continue_on_instance_error: bool,
}

impl CollectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.collection.parallelism,
            order_by: CostOrder::parse(&config.collection.order_by).unwrap_or(CostOrder::Cpu),
            retention_days: config.collection.retention_days,
            continue_on_database_error: config.collection.continue_on_database_error,
            continue_on_instance_error: config.collection.continue_on_instance_error,
        }
    }
}

#[derive(Clone)]
pub struct CollectionService {
    source: Arc<dyn StatsSource>,
    fingerprints: FingerprintRepo,
    snapshots: SnapshotStore,
    samples: SampleStore,
}

impl CollectionService {
    pub fn new(
        source: Arc<dyn StatsSource>,
        fingerprints: FingerprintRepo,
        snapshots: SnapshotStore,
        samples: SampleStore,
    ) -> Self {
        Self { source, fingerprints, snapshots, samples }
    }

    /// Run one collection cycle over the given targets.
    pub async fn run_cycle(
        &self,
        config: &Config,
        targets: Vec<Target>,
        shutdown: Arc<AtomicBool>,
    ) -> CollectionRunSummary {
        let started_at_utc = Utc::now();
        let settings = CollectionSettings::from_config(config);
        let semaphore = Arc::new(Semaphore::new(settings.parallelism.max(1)));
        let aborted_instances: Arc<DashSet<String>> = Arc::new(DashSet::new());
        // Set when a non-continuable error should stop the whole cycle
        let cycle_abort = Arc::new(AtomicBool::new(false));

        info!(
            targets = targets.len(),
            parallelism = settings.parallelism,
            "starting collection cycle"
        );

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets.iter().cloned() {
            let service = self.clone();
            let settings = settings.clone();
            let effective =
                config.effective_collection(&target.instance_name, &target.database_name);
            let semaphore = Arc::clone(&semaphore);
            let shutdown = Arc::clone(&shutdown);
            let aborted = Arc::clone(&aborted_instances);
            let cycle_abort = Arc::clone(&cycle_abort);

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return failed_result(&target, "cycle cancelled", 0),
                };

                if shutdown.load(Ordering::Relaxed) || cycle_abort.load(Ordering::Relaxed) {
                    return failed_result(&target, "cycle cancelled", 0);
                }
                if aborted.contains(&target.instance_name) {
                    return failed_result(&target, "instance aborted after earlier error", 0);
                }

                let start = std::time::Instant::now();
                let deadline = std::time::Duration::from_secs(effective.timeout_secs);
                let outcome = tokio::time::timeout(
                    deadline,
                    service.collect_target(&target, &settings, &effective, &shutdown),
                )
                .await;
                let duration_ms = start.elapsed().as_millis() as i64;

                match outcome {
                    Ok(Ok(mut result)) => {
                        result.duration_ms = duration_ms;
                        result
                    },
                    Ok(Err(e)) => {
                        warn!(target_key = %target.key(), error = %e, "target collection failed");
                        match &e {
                            // Connect failures always take the rest of the
                            // instance with them; whether the cycle goes on
                            // is the continue_on_instance_error call.
                            MonitorError::TargetConnect { .. } => {
                                aborted.insert(target.instance_name.clone());
                                if !settings.continue_on_instance_error {
                                    cycle_abort.store(true, Ordering::Relaxed);
                                }
                            },
                            _ if !settings.continue_on_database_error => {
                                aborted.insert(target.instance_name.clone());
                            },
                            _ => {},
                        }
                        failed_result(&target, &e.to_string(), duration_ms)
                    },
                    Err(_) => {
                        let e = MonitorError::TargetTimeout {
                            target: target.key(),
                            seconds: effective.timeout_secs,
                        };
                        warn!(target_key = %target.key(), "target collection timed out");
                        failed_result(&target, &e.to_string(), duration_ms)
                    },
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!("collection task panicked: {}", e),
            }
        }

        // Retention runs after the fan-out so the cycle's own samples are
        // never candidates.
        let cutoff = Utc::now() - Duration::days(settings.retention_days);
        let samples_purged = match self.samples.purge_older_than(cutoff).await {
            Ok(count) => {
                if count > 0 {
                    info!(purged = count, "purged samples past retention");
                }
                count
            },
            Err(e) => {
                warn!("sample purge failed: {}", e);
                0
            },
        };

        let summary = summarize(started_at_utc, targets, results, samples_purged);
        info!(
            succeeded = summary.targets_succeeded,
            failed = summary.targets_failed,
            samples = summary.samples_written,
            "collection cycle finished"
        );
        summary
    }

    /// Collect one target: fetch, fingerprint, delta, persist.
    async fn collect_target(
        &self,
        target: &Target,
        settings: &CollectionSettings,
        effective: &crate::config::EffectiveCollection,
        shutdown: &AtomicBool,
    ) -> MonitorResult<TargetCollectionResult> {
        let historical = self.source.is_historical_store_available(target).await;
        debug!(target_key = %target.key(), historical, "historical store availability");

        let rows = self
            .source
            .fetch_top_by_cost(target, effective.top_n, effective.lookback_minutes, settings.order_by)
            .await?;

        let sampled_at = Utc::now();
        let mut samples_written = 0usize;
        let mut new_fingerprints = 0usize;
        let mut counter_resets = 0usize;
        let rows_observed = rows.len();

        for row in &rows {
            if shutdown.load(Ordering::Relaxed) {
                return Err(MonitorError::TargetQuery {
                    target: target.key(),
                    detail: "cancelled mid-target".into(),
                });
            }
            if row.exec_count < effective.minimum_execution_count as i64 {
                continue;
            }

            let identity = fingerprint::fingerprint(&row.sql_text);
            let (fingerprint_id, is_new) = self
                .fingerprints
                .upsert(
                    &target.instance_name,
                    &target.database_name,
                    &identity,
                    row.native_query_hash.as_deref(),
                )
                .await?;
            if is_new {
                new_fingerprints += 1;
            }

            let prior = self
                .snapshots
                .get_last(target, fingerprint_id, row.plan_hash.as_deref())
                .await?;

            let outcome =
                DeltaEngine::compute(target, fingerprint_id, prior.as_ref(), row, sampled_at);
            if outcome.was_reset {
                counter_resets += 1;
            }

            // Strict order: sample first, snapshot second. A failure between
            // the two overcounts at most one interval on the next cycle.
            self.samples.append(std::slice::from_ref(&outcome.sample)).await?;
            self.snapshots.save(&outcome.snapshot).await?;
            samples_written += 1;
        }

        Ok(TargetCollectionResult {
            instance_name: target.instance_name.clone(),
            database_name: target.database_name.clone(),
            success: true,
            rows_observed,
            samples_written,
            new_fingerprints,
            counter_resets,
            error: None,
            duration_ms: 0,
        })
    }
}

fn failed_result(target: &Target, error: &str, duration_ms: i64) -> TargetCollectionResult {
    TargetCollectionResult {
        instance_name: target.instance_name.clone(),
        database_name: target.database_name.clone(),
        success: false,
        rows_observed: 0,
        samples_written: 0,
        new_fingerprints: 0,
        counter_resets: 0,
        error: Some(error.to_string()),
        duration_ms,
    }
}

fn summarize(
    started_at_utc: chrono::DateTime<Utc>,
    targets: Vec<Target>,
    results: Vec<TargetCollectionResult>,
    samples_purged: u64,
) -> CollectionRunSummary {
    let mut instances: Vec<InstanceCollectionResult> = Vec::new();
    for target in &targets {
        if !instances.iter().any(|i| i.instance_name == target.instance_name) {
            instances.push(InstanceCollectionResult {
                instance_name: target.instance_name.clone(),
                connect_error: None,
                targets: Vec::new(),
            });
        }
    }
    for result in results {
        if let Some(instance) = instances
            .iter_mut()
            .find(|i| i.instance_name == result.instance_name)
        {
            if !result.success
                && instance.connect_error.is_none()
                && result
                    .error
                    .as_deref()
                    .is_some_and(|e| e.contains("failed to connect"))
            {
                instance.connect_error = result.error.clone();
            }
            instance.targets.push(result);
        }
    }

    let targets_total = instances.iter().map(|i| i.targets.len()).sum();
    let targets_succeeded = instances
        .iter()
        .flat_map(|i| &i.targets)
        .filter(|t| t.success)
        .count();
    let samples_written = instances
        .iter()
        .flat_map(|i| &i.targets)
        .map(|t| t.samples_written)
        .sum();

    CollectionRunSummary {
        started_at_utc,
        finished_at_utc: Utc::now(),
        targets_total,
        targets_succeeded,
        targets_failed: targets_total - targets_succeeded,
        samples_written,
        samples_purged,
        instances,
    }
}
