//! Shared test fixtures: an in-memory store set and a scriptable stats
//! source that plays back batches of observed rows per target.

use crate::models::{ObservedRow, Target};
use crate::services::stats_source::{CostOrder, StatsSource};
use crate::services::store::{
    AuditRepo, BaselineRepo, EventRepo, FingerprintRepo, SampleStore, SnapshotStore,
};
use crate::utils::{MonitorError, MonitorResult};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub struct Stores {
    pub pool: SqlitePool,
    pub fingerprints: FingerprintRepo,
    pub snapshots: SnapshotStore,
    pub samples: SampleStore,
    pub baselines: BaselineRepo,
    pub events: EventRepo,
    pub audit: AuditRepo,
}

pub async fn stores() -> Stores {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    crate::db::init_schema(&pool).await.unwrap();
    Stores {
        fingerprints: FingerprintRepo::new(pool.clone()),
        snapshots: SnapshotStore::new(pool.clone()),
        samples: SampleStore::new(pool.clone()),
        baselines: BaselineRepo::new(pool.clone()),
        events: EventRepo::new(pool.clone()),
        audit: AuditRepo::new(pool.clone()),
        pool,
    }
}

/// Plays back scripted batches per target, one per `fetch_top_by_cost` call.
/// An exhausted queue yields empty batches.
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<HashMap<String, VecDeque<MonitorResult<Vec<ObservedRow>>>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, target: &Target, batch: Vec<ObservedRow>) {
        self.batches
            .lock()
            .unwrap()
            .entry(target.key())
            .or_default()
            .push_back(Ok(batch));
    }

    pub fn push_error(&self, target: &Target) {
        self.batches
            .lock()
            .unwrap()
            .entry(target.key())
            .or_default()
            .push_back(Err(MonitorError::target_connect(target.key(), "scripted failure")));
    }
}

#[async_trait]
impl StatsSource for ScriptedSource {
    async fn fetch_top_by_cost(
        &self,
        target: &Target,
        _top_n: u32,
        _lookback_minutes: u32,
        _order_by: CostOrder,
    ) -> MonitorResult<Vec<ObservedRow>> {
        self.batches
            .lock()
            .unwrap()
            .get_mut(&target.key())
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn is_historical_store_available(&self, _target: &Target) -> bool {
        true
    }
}

pub fn observed(sql: &str, exec_count: i64, total_cpu_us: i64) -> ObservedRow {
    ObservedRow {
        sql_text: sql.to_string(),
        exec_count,
        total_cpu_us,
        total_duration_us: total_cpu_us * 2,
        total_logical_reads: exec_count * 100,
        total_logical_writes: exec_count,
        total_physical_reads: 0,
        ..Default::default()
    }
}

pub fn test_config(toml_targets: &str) -> crate::config::Config {
    let text = format!(
        r#"
        [collection]
        top_n = 50
        timeout_secs = 30
        parallelism = 2
        retention_days = 30

        {}
        "#,
        toml_targets
    );
    toml::from_str(&text).unwrap()
}
