//! Registry of named pools.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use quay_core::config::DatabasePoolSettings;

use crate::driver::SqlxConnector;
use crate::error::PoolError;
use crate::pool::{Pool, PoolConfig};

pub struct PoolManager {
    pools: RwLock<HashMap<String, Pool>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Create one pool per descriptor and warm each up to its minimum size
    /// (best effort; an unreachable driver is logged, not fatal).
    pub async fn configure_from_settings(
        &self,
        descriptors: &[DatabasePoolSettings],
    ) -> Result<(), PoolError> {
        for descriptor in descriptors {
            let connector = Arc::new(SqlxConnector::from_settings(descriptor)?);
            let pool = Pool::new(
                descriptor.name.clone(),
                connector,
                PoolConfig::from_settings(descriptor),
            );
            pool.warm_up().await;
            info!(pool = %descriptor.name, driver = %descriptor.driver, "pool configured");
            self.register(pool);
        }
        Ok(())
    }

    /// Register a pre-built pool (tests, custom connectors). Replaces any
    /// pool of the same name.
    pub fn register(&self, pool: Pool) {
        self.pools
            .write()
            .expect("pool registry lock poisoned")
            .insert(pool.name().to_string(), pool);
    }

    pub fn get(&self, name: &str) -> Result<Pool, PoolError> {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<Pool> {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Drain every pool concurrently, returning once all have drained or the
    /// global deadline elapses. Each pool's shutdown runs on its own task,
    /// so a pool still force-closing stragglers at the deadline finishes
    /// that work even after this returns.
    pub async fn shutdown_all(&self, deadline: Duration) {
        let drains: Vec<_> = self
            .all()
            .into_iter()
            .map(|pool| tokio::spawn(async move { pool.shutdown(deadline).await }))
            .collect();
        let _ = tokio::time::timeout(deadline, futures_util::future::join_all(drains)).await;
    }

    /// Spawn the idle-eviction/top-up task for every registered pool.
    pub fn spawn_maintenance(
        &self,
        interval: Duration,
        token: &CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        self.all()
            .into_iter()
            .map(|pool| pool.spawn_maintenance(interval, token.child_token()))
            .collect()
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}
