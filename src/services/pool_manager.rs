//! Per-target connection pool cache.
//!
//! Design: DashMap for lock-free concurrent access; one pool per target so
//! repeated cycles don't reconnect. Connection strings come from the
//! `SecretResolver`, never from entity state.

use crate::models::Target;
use crate::services::SecretResolver;
use crate::services::mysql_client::MysqlClient;
use crate::utils::{MonitorError, MonitorResult};
use dashmap::DashMap;
use mysql_async::Pool;
use std::sync::Arc;

#[derive(Clone)]
pub struct TargetPoolManager {
    pools: Arc<DashMap<String, Pool>>,
    secrets: Arc<dyn SecretResolver>,
}

impl TargetPoolManager {
    pub fn new(secrets: Arc<dyn SecretResolver>) -> Self {
        Self { pools: Arc::new(DashMap::new()), secrets }
    }

    /// Get or create the pool for a target.
    ///
    /// Fast path: existing pool, lock-free read. Slow path: resolve the DSN
    /// and build a new pool.
    pub fn get_pool(&self, target: &Target) -> MonitorResult<Pool> {
        let key = target.key();

        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }

        let dsn = self.secrets.get_connection_string(target)?;
        let opts = mysql_async::Opts::from_url(&dsn)
            .map_err(|e| MonitorError::target_connect(&key, format!("invalid DSN: {}", e)))?;
        let pool = Pool::new(opts);

        self.pools.insert(key.clone(), pool.clone());
        tracing::info!("Created connection pool for target {}", key);

        Ok(pool)
    }

    pub fn client(&self, target: &Target) -> MonitorResult<MysqlClient> {
        Ok(MysqlClient::from_pool(self.get_pool(target)?, target.key()))
    }

    /// Drop the cached pool for a target, forcing a reconnect next cycle.
    pub fn evict(&self, target: &Target) {
        self.pools.remove(&target.key());
    }
}
