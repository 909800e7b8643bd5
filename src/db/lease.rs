//! Handle leasing: task-scoped leases and transient checkouts.
//!
//! Two ways to hold a handle:
//!
//! - [`LeaseContext::lease_handle`] ties a handle to a [`TaskScope`]. Every
//!   lease of the same connection within one task yields the same handle,
//!   and the handle goes back to its pool when the task completes.
//! - [`LeaseContext::with_handle`] checks a handle out for the duration of
//!   one operation and returns it on every exit path.
//!
//! # Concurrency
//!
//! Leases are created single-flight per (task, connection) pair through a
//! `OnceCell`, so concurrent leases within one task never check out twice.
//! Locks are never held across await points.

use crate::db::directory::PoolDirectory;
use crate::db::pool::{HandleOf, PoolFactory, ResourcePool};
use crate::db::task::{TaskId, TaskScope};
use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

struct Lease<P: ResourcePool> {
    pool: Arc<P>,
    handle: Arc<P::Handle>,
}

type LeaseCell<P> = Arc<OnceCell<Lease<P>>>;
type LeaseTable<P> = HashMap<TaskId, HashMap<String, LeaseCell<P>>>;

pub struct LeaseContext<F: PoolFactory> {
    directory: Arc<PoolDirectory<F>>,
    leases: Arc<Mutex<LeaseTable<F::Pool>>>,
}

impl<F: PoolFactory> LeaseContext<F> {
    pub fn new(directory: Arc<PoolDirectory<F>>) -> Self {
        Self {
            directory,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lease a handle on `name` for the lifetime of `task`.
    ///
    /// The first lease of a connection within a task checks a handle out,
    /// waiting at most `timeout`. Later leases return the same handle. The
    /// handle is returned to its pool when the task completes.
    pub async fn lease_handle(
        &self,
        task: &TaskScope,
        name: &str,
        timeout: Duration,
    ) -> DbResult<Arc<HandleOf<F>>> {
        if task.is_completed() {
            return Err(task_completed(task, name));
        }

        let cell = self.lease_cell(task, name);
        let lease = cell
            .get_or_try_init(|| async {
                let pool = self.directory.pool_for(name)?;
                let handle = pool.checkout(timeout).await.map_err(as_deferred)?;
                debug!(task = task.id(), connection = %name, "Leased handle");
                Ok::<_, DbError>(Lease { pool, handle })
            })
            .await?;

        // The task may have completed while checkout was waiting; its cleanup
        // has then already dropped this cell and nobody else will return it.
        if !self.is_tracked(task.id(), name, &cell) {
            lease.pool.release(Arc::clone(&lease.handle)).await;
            debug!(task = task.id(), connection = %name, "Returned handle leased after task end");
            return Err(task_completed(task, name));
        }
        Ok(Arc::clone(&lease.handle))
    }

    /// Check out a handle on `name`, run `op` with it and return it.
    ///
    /// The handle goes back to the pool exactly once whether `op` succeeds
    /// or fails; errors from `op` are returned unchanged.
    ///
    /// If the returned future is dropped before finishing, the release is
    /// spawned on the current tokio runtime. Dropped outside any runtime,
    /// the handle is not released and only a warning is logged.
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
        let pool = self.directory.pool_for(name)?;
        let handle = pool.checkout(timeout).await?;
        let guard = CheckoutGuard::new(name, pool, Arc::clone(&handle));
        let result = op(handle).await;
        guard.release().await;
        result
    }

    /// Number of handles currently leased to `task`.
    pub fn leased_count(&self, task: TaskId) -> usize {
        self.leases
            .lock()
            .get(&task)
            .map(|leases| leases.values().filter(|cell| cell.initialized()).count())
            .unwrap_or(0)
    }

    fn is_tracked(&self, task: TaskId, name: &str, cell: &LeaseCell<F::Pool>) -> bool {
        self.leases
            .lock()
            .get(&task)
            .and_then(|leases| leases.get(name))
            .is_some_and(|tracked| Arc::ptr_eq(tracked, cell))
    }

    /// Get or create the cell for (task, name). Creating the first cell of a
    /// task registers the cleanup that releases all of its leases.
    fn lease_cell(&self, task: &TaskScope, name: &str) -> LeaseCell<F::Pool> {
        let mut leases = self.leases.lock();
        let task_leases = match leases.entry(task.id()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let table = Arc::clone(&self.leases);
                let task_id = task.id();
                task.defer(move || release_task_leases(table, task_id));
                entry.insert(HashMap::new())
            }
        };
        Arc::clone(task_leases.entry(name.to_string()).or_default())
    }
}

impl<F: PoolFactory> std::fmt::Debug for LeaseContext<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseContext")
            .field("tasks", &self.leases.lock().len())
            .finish_non_exhaustive()
    }
}

async fn release_task_leases<P: ResourcePool>(leases: Arc<Mutex<LeaseTable<P>>>, task: TaskId) {
    let removed = leases.lock().remove(&task);
    let task_leases = match removed {
        Some(task_leases) => task_leases,
        None => return,
    };
    for (name, cell) in task_leases {
        if let Some(lease) = cell.get() {
            lease.pool.release(Arc::clone(&lease.handle)).await;
            debug!(task, connection = %name, "Released leased handle");
        }
    }
}

fn task_completed(task: &TaskScope, name: &str) -> DbError {
    DbError::invalid_input(format!(
        "Task {} already completed, cannot lease connection: {}",
        task.id(),
        name
    ))
}

/// Timeouts while leasing are reported as "defer" rather than "checkout".
fn as_deferred(err: DbError) -> DbError {
    match err {
        DbError::PoolTimeout {
            connection,
            timeout_ms,
            ..
        } => DbError::PoolTimeout {
            connection,
            operation: "defer".to_string(),
            timeout_ms,
        },
        other => other,
    }
}

/// Returns a transient checkout to its pool.
///
/// Call [`release`](Self::release) explicitly. Dropping an unreleased guard
/// (panic or cancelled future) spawns the release on the runtime instead.
struct CheckoutGuard<P: ResourcePool> {
    connection: String,
    pool: Arc<P>,
    handle: Option<Arc<P::Handle>>,
}

impl<P: ResourcePool> CheckoutGuard<P> {
    fn new(connection: &str, pool: Arc<P>, handle: Arc<P::Handle>) -> Self {
        Self {
            connection: connection.to_string(),
            pool,
            handle: Some(handle),
        }
    }

    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle).await;
        }
    }
}

impl<P: ResourcePool> Drop for CheckoutGuard<P> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        let connection = std::mem::take(&mut self.connection);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    pool.release(handle).await;
                    warn!(
                        connection = %connection,
                        "Handle released via Drop - operation did not finish"
                    );
                });
            }
            Err(_) => {
                warn!(connection = %connection, "Handle dropped outside a runtime, not released");
            }
        }
    }
}
