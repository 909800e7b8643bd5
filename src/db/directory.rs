//! Lazily built, cached pools keyed by connection name.

use crate::db::pool::{PoolFactory, ResourcePool};
use crate::db::registry::ConnectionRegistry;
use crate::db::timer::TimerRegistry;
use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One pool per registered connection name, created on first use.
///
/// Lookup and insertion happen under a single write lock, so two callers
/// racing for the same uncached name always get the same instance.
pub struct PoolDirectory<F: PoolFactory> {
    factory: F,
    registry: Arc<ConnectionRegistry>,
    timers: Arc<TimerRegistry>,
    pools: RwLock<HashMap<String, Arc<F::Pool>>>,
}

impl<F: PoolFactory> PoolDirectory<F> {
    pub fn new(factory: F, registry: Arc<ConnectionRegistry>, timers: Arc<TimerRegistry>) -> Self {
        Self {
            factory,
            registry,
            timers,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Return the pool for `name`, building and caching it on first use.
    ///
    /// Fails with [`DbError::UnregisteredConnection`] when `name` has no
    /// registered configuration. Nothing is cached in that case.
    pub fn pool_for(&self, name: &str) -> DbResult<Arc<F::Pool>> {
        if let Some(pool) = self.pools.read().get(name) {
            return Ok(Arc::clone(pool));
        }

        let mut pools = self.pools.write();
        // Double-check after acquiring write lock
        if let Some(pool) = pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        let config = self
            .registry
            .get(name)
            .ok_or_else(|| DbError::unregistered(name))?;
        let pool = Arc::new(self.factory.create(&config, &self.timers)?);
        info!(
            connection = %name,
            db_type = %config.db_type,
            url = %config.masked_connection_string(),
            "Created connection pool"
        );
        pools.insert(name.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    /// The cached pool for `name`, without creating one.
    pub fn cached(&self, name: &str) -> Option<Arc<F::Pool>> {
        self.pools.read().get(name).cloned()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.read().len()
    }

    /// Reset every cached pool and empty the cache.
    ///
    /// The next [`pool_for`](Self::pool_for) builds fresh pools. With
    /// `clear_timers`, every timer registered with the manager is cancelled
    /// too. Returns the number of pools reset.
    pub async fn reset_all(&self, clear_timers: bool) -> usize {
        // Drain under lock, reset outside it
        let drained: Vec<(String, Arc<F::Pool>)> = self.pools.write().drain().collect();
        let count = drained.len();

        for (name, pool) in drained {
            debug!(connection = %name, "Resetting connection pool");
            pool.reset().await;
        }

        if clear_timers {
            let cancelled = self.timers.clear_all();
            debug!(timers = cancelled, "Cleared timers");
        }

        info!(pools = count, clear_timers, "Reset all connection pools");
        count
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }
}

impl<F: PoolFactory> std::fmt::Debug for PoolDirectory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pools = self.pools.read();
        let mut names: Vec<&String> = pools.keys().collect();
        names.sort();
        f.debug_struct("PoolDirectory")
            .field("pools", &names)
            .finish_non_exhaustive()
    }
}
