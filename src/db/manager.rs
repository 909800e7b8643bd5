//! The database manager: one explicit context for registry, pools, leases
//! and the query hook.
//!
//! ```no_run
//! use db_manager::{DbManager, QueryDescriptor};
//! use db_manager::models::ConnectionConfig;
//! use db_manager::config::PoolOptions;
//!
//! # async fn demo() -> db_manager::DbResult<()> {
//! let manager = DbManager::sqlx();
//! manager.add_connection(ConnectionConfig::new("default", "sqlite::memory:", PoolOptions::default()).unwrap());
//!
//! let result = manager
//!     .fast_query("default")
//!     .query(&QueryDescriptor::raw("SELECT 1 AS one"))
//!     .await?;
//! assert_eq!(result.row_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::config::{DEFAULT_CHECKOUT_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::db::directory::PoolDirectory;
use crate::db::executor::{self, QueryExecutor};
use crate::db::hook::{HookSlot, QueryHook};
use crate::db::lease::LeaseContext;
use crate::db::pool::{HandleOf, PoolFactory, PoolStats, ResourcePool};
use crate::db::registry::ConnectionRegistry;
use crate::db::sqlx_pool::SqlxPoolFactory;
use crate::db::task::TaskScope;
use crate::db::timer::TimerRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, QueryDescriptor, QueryResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct DbManager<F: PoolFactory = SqlxPoolFactory> {
    registry: Arc<ConnectionRegistry>,
    timers: Arc<TimerRegistry>,
    directory: Arc<PoolDirectory<F>>,
    leases: LeaseContext<F>,
    hooks: HookSlot,
    checkout_timeout: Duration,
    query_timeout: Duration,
}

impl DbManager<SqlxPoolFactory> {
    /// A manager backed by sqlx pools.
    pub fn sqlx() -> Self {
        Self::new(SqlxPoolFactory)
    }
}

impl<F: PoolFactory> DbManager<F> {
    pub fn new(factory: F) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let timers = Arc::new(TimerRegistry::new());
        let directory = Arc::new(PoolDirectory::new(
            factory,
            Arc::clone(&registry),
            Arc::clone(&timers),
        ));
        Self {
            leases: LeaseContext::new(Arc::clone(&directory)),
            registry,
            timers,
            directory,
            hooks: HookSlot::new(),
            checkout_timeout: Duration::from_secs_f64(DEFAULT_CHECKOUT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Default wait for a free handle in [`fast_query`](Self::fast_query).
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Default statement timeout in [`fast_query`](Self::fast_query).
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Register `config` under its name, replacing any previous entry.
    ///
    /// A pool already built for that name keeps serving until the next
    /// [`reset_all`](Self::reset_all).
    pub fn add_connection(&self, config: ConnectionConfig) -> &Self {
        self.registry.register(config);
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    // -------------------------------------------------------------------------
    // Pools
    // -------------------------------------------------------------------------

    /// The pool for `name`, built on first use.
    pub fn pool_for(&self, name: &str) -> DbResult<Arc<F::Pool>> {
        self.directory.pool_for(name)
    }

    /// Stats of the pool for `name`, if one has been built.
    pub fn pool_stats(&self, name: &str) -> Option<PoolStats> {
        self.directory.cached(name).map(|pool| pool.stats())
    }

    /// Reset and forget every pool. See [`PoolDirectory::reset_all`].
    pub async fn reset_all(&self, clear_timers: bool) -> usize {
        self.directory.reset_all(clear_timers).await
    }

    // -------------------------------------------------------------------------
    // Handles
    // -------------------------------------------------------------------------

    /// Check a handle out of `name`'s pool for the duration of `op`.
    pub async fn with_handle<T, E, Op, Fut>(
        &self,
        name: &str,
        timeout: Duration,
        op: Op,
    ) -> Result<T, E>
    where
        Op: FnOnce(Arc<HandleOf<F>>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        self.leases.with_handle(name, timeout, op).await
    }

    /// Lease a handle on `name` for the lifetime of `task`.
    pub async fn lease_handle(
        &self,
        task: &TaskScope,
        name: &str,
        timeout: Duration,
    ) -> DbResult<Arc<HandleOf<F>>> {
        self.leases.lease_handle(task, name, timeout).await
    }

    pub fn leased_count(&self, task: &TaskScope) -> usize {
        self.leases.leased_count(task.id())
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Run `descriptor` on `handle`, notify the hook and attach the total
    /// count when the descriptor asks for it.
    pub async fn execute(
        &self,
        handle: &HandleOf<F>,
        descriptor: &QueryDescriptor,
        raw: bool,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        executor::execute(&self.hooks, handle, descriptor, raw, timeout).await
    }

    /// A statement runner bound to `name` with the manager's default timeouts.
    pub fn fast_query(&self, name: &str) -> QueryExecutor<'_, F> {
        QueryExecutor::new(self, name, self.checkout_timeout, self.query_timeout)
    }

    // -------------------------------------------------------------------------
    // Hook
    // -------------------------------------------------------------------------

    pub fn set_hook(&self, hook: QueryHook) {
        self.hooks.set(hook);
    }

    pub fn hook(&self) -> Option<QueryHook> {
        self.hooks.get()
    }

    /// Get-or-set form: `Some` installs the hook, `None` leaves the current
    /// one in place. Either way the hook now installed is returned.
    pub fn replace_hook(&self, hook: Option<QueryHook>) -> Option<QueryHook> {
        self.hooks.replace(hook)
    }

    pub fn clear_hook(&self) -> Option<QueryHook> {
        self.hooks.clear()
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    pub fn begin_task(&self) -> TaskScope {
        TaskScope::new()
    }

    /// Run `op` in a fresh task and complete the task afterwards, releasing
    /// every handle leased to it. The result of `op` is returned unchanged.
    pub async fn run_task<T, E, Op, Fut>(&self, op: Op) -> Result<T, E>
    where
        Op: FnOnce(Arc<TaskScope>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let task = Arc::new(self.begin_task());
        debug!(task = task.id(), "Task started");
        let result = op(Arc::clone(&task)).await;
        task.complete().await;
        result
    }

    /// Run `op` as the program's top-level task: complete the task, then
    /// reset every pool and cancel every timer so the process can exit.
    pub async fn run_in_main<T, E, Op, Fut>(&self, op: Op) -> Result<T, E>
    where
        Op: FnOnce(Arc<TaskScope>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.run_task(op).await;
        self.reset_all(true).await;
        result
    }
}

impl<F: PoolFactory> std::fmt::Debug for DbManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager")
            .field("connections", &self.registry.names())
            .field("directory", &self.directory)
            .field("timers", &self.timers.len())
            .field("hooks", &self.hooks)
            .field("checkout_timeout", &self.checkout_timeout)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}
