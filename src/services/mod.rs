pub mod advisor;
pub mod alert;
pub mod analyzer;
pub mod collector;
pub mod fingerprint;
pub mod mysql_client;
pub mod pool_manager;
pub mod remediation;
pub mod stats_source;
pub mod store;

pub use advisor::RemediationAdvisor;
pub use alert::{AlertChannel, AlertGateway, GatewaySettings};
pub use analyzer::AnalysisService;
pub use collector::CollectionService;
pub use pool_manager::TargetPoolManager;
pub use remediation::RemediationExecutor;
pub use stats_source::{ConfigSecretResolver, CostOrder, MysqlStatsSource, SecretResolver, StatsSource};
pub use store::{AuditRepo, BaselineRepo, EventRepo, FingerprintRepo, SampleStore, SnapshotStore};
