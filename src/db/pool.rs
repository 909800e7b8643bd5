//! Pool and handle abstractions.
//!
//! The manager never talks to a driver directly. It consumes three traits:
//!
//! - [`DbHandle`]: a checked-out client that can execute a descriptor
//! - [`ResourcePool`]: checkout/return/reset of handles for one connection
//! - [`PoolFactory`]: builds a pool from a registered [`ConnectionConfig`]
//!
//! [`SqlxPoolFactory`](super::SqlxPoolFactory) is the production
//! implementation; tests plug in doubles.

use crate::db::timer::TimerRegistry;
use crate::error::DbResult;
use crate::models::{ConnectionConfig, QueryDescriptor, QueryResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A live, checked-out database client.
#[async_trait]
pub trait DbHandle: Send + Sync + 'static {
    /// Identifier unique among the handles of one process.
    fn id(&self) -> u64;

    /// Name of the connection this handle was checked out from.
    fn connection_name(&self) -> &str;

    /// Run one statement. `raw` skips result post-processing.
    async fn execute(
        &self,
        descriptor: &QueryDescriptor,
        raw: bool,
        timeout: Duration,
    ) -> DbResult<QueryResult>;
}

/// Pool of handles for one named connection.
#[async_trait]
pub trait ResourcePool: Send + Sync + 'static {
    type Handle: DbHandle;

    /// Wait up to `timeout` for a free handle.
    ///
    /// Fails with [`DbError::PoolTimeout`](crate::DbError::PoolTimeout)
    /// without consuming a handle when none frees up in time.
    async fn checkout(&self, timeout: Duration) -> DbResult<Arc<Self::Handle>>;

    /// Give a handle back. Releasing an already released handle is a no-op.
    async fn release(&self, handle: Arc<Self::Handle>);

    /// Drain and destroy every handle and stop any timer the pool owns.
    async fn reset(&self);

    fn stats(&self) -> PoolStats;
}

/// Builds one pool per connection config.
///
/// `create` must not block or perform I/O: the directory calls it while
/// holding its cache lock.
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ResourcePool;

    fn create(&self, config: &ConnectionConfig, timers: &TimerRegistry) -> DbResult<Self::Pool>;
}

/// Handle type produced by a factory's pools.
pub type HandleOf<F> = <<F as PoolFactory>::Pool as ResourcePool>::Handle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle or not
    pub size: u32,
    pub idle: u32,
    /// Handles currently held by callers
    pub checked_out: u32,
}
