//! planwatch library
//!
//! Core of the query-regression monitoring daemon: collection, baselining,
//! detection, alerting and gated remediation over configured database
//! targets.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    AlertGateway, AnalysisService, CollectionService, RemediationAdvisor, RemediationExecutor,
    TargetPoolManager,
};
pub use utils::{MonitorError, MonitorResult};

use crate::models::RankingMetric;
use crate::services::alert::email::EmailChannel;
use crate::services::alert::log::LogChannel;
use crate::services::alert::webhook::WebhookChannel;
use crate::services::analyzer::baseline::BaselineBuilder;
use crate::services::analyzer::detector::RegressionDetector;
use crate::services::analyzer::hotspot::HotspotDetector;
use crate::services::stats_source::{ConfigSecretResolver, MysqlStatsSource};
use crate::services::store::{
    AuditRepo, BaselineRepo, EventRepo, FingerprintRepo, SampleStore, SnapshotStore,
};
use crate::services::{AlertChannel, GatewaySettings};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// Everything is constructed once here, at startup, from the loaded
/// configuration; services receive their collaborators explicitly.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub pool_manager: Arc<TargetPoolManager>,
    pub fingerprints: FingerprintRepo,
    pub samples: SampleStore,
    pub events: EventRepo,
    pub audit: AuditRepo,

    pub collection: CollectionService,
    pub analysis: AnalysisService,
    pub gateway: Arc<AlertGateway>,
    pub advisor: RemediationAdvisor,
    pub remediation: Arc<RemediationExecutor>,
}

impl AppState {
    pub async fn build(config: Config) -> Result<Self, anyhow::Error> {
        let pool = db::create_pool(&config.storage.url).await?;
        tracing::info!("Local store ready at {}", config.storage.url);

        let secrets = Arc::new(ConfigSecretResolver::new(&config.targets));
        let pool_manager = Arc::new(TargetPoolManager::new(secrets));

        let fingerprints = FingerprintRepo::new(pool.clone());
        let snapshots = SnapshotStore::new(pool.clone());
        let samples = SampleStore::new(pool.clone());
        let baselines = BaselineRepo::new(pool.clone());
        let events = EventRepo::new(pool.clone());
        let audit = AuditRepo::new(pool.clone());

        let source = Arc::new(MysqlStatsSource::new(Arc::clone(&pool_manager)));
        let collection = CollectionService::new(
            source,
            fingerprints.clone(),
            snapshots,
            samples.clone(),
        );

        let detector = RegressionDetector::new(config.detector.clone());
        let hotspot_metric = RankingMetric::parse(&config.analysis.hotspot_metric)
            .unwrap_or(RankingMetric::Cpu);
        let hotspots = HotspotDetector::new(hotspot_metric, config.analysis.hotspot_top_n);
        let builder = BaselineBuilder::new(
            samples.clone(),
            baselines.clone(),
            config.analysis.min_baseline_samples,
        );
        let analysis = AnalysisService::new(
            samples.clone(),
            baselines,
            events.clone(),
            fingerprints.clone(),
            detector,
            hotspots,
            builder,
        );

        let channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(LogChannel),
            Arc::new(WebhookChannel::new(config.alerts.webhook.clone())),
            Arc::new(EmailChannel::new(config.alerts.email.clone())),
        ];
        let gateway = Arc::new(AlertGateway::new(
            channels,
            GatewaySettings {
                cooldown_minutes: config.alerts.cooldown_minutes,
                max_alerts_per_hour: config.alerts.max_alerts_per_hour,
            },
        ));

        let remediation = Arc::new(RemediationExecutor::new(
            Arc::clone(&pool_manager),
            audit.clone(),
            config.remediation.clone(),
            config.auto_execute_types(),
        ));

        Ok(Self {
            db: pool,
            config,
            pool_manager,
            fingerprints,
            samples,
            events,
            audit,
            collection,
            analysis,
            gateway,
            advisor: RemediationAdvisor::new(),
            remediation,
        })
    }
}
