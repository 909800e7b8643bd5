//! Statement execution on top of a handle.
//!
//! [`execute`] runs one descriptor on one handle, reports it to the hook and,
//! when the descriptor carries the total-count marker, runs the count
//! follow-up on the same handle.
//!
//! [`QueryExecutor`] binds a connection name and settings so callers can run
//! statements without managing handles themselves.

use crate::db::hook::HookSlot;
use crate::db::manager::DbManager;
use crate::db::pool::{DbHandle, HandleOf, PoolFactory};
use crate::db::task::TaskScope;
use crate::error::{DbError, DbResult};
use crate::models::{COUNT_COLUMN, QueryDescriptor, QueryResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Run `descriptor` on `handle`.
///
/// Order of events: primary statement, hook, count statement, hook. A failure
/// at any step is returned and the primary result is discarded.
pub async fn execute<H: DbHandle>(
    hooks: &HookSlot,
    handle: &H,
    descriptor: &QueryDescriptor,
    raw: bool,
    timeout: Duration,
) -> DbResult<QueryResult> {
    let started_at = Utc::now();

    let mut result = handle.execute(descriptor, raw, timeout).await?;
    hooks.notify(&result, descriptor, handle, started_at)?;

    if descriptor.wants_total_count() {
        // Same handle: MySQL's FOUND_ROWS() is session state
        let count_query = descriptor.count_query();
        let count = handle.execute(&count_query, false, timeout).await?;
        hooks.notify(&count, &count_query, handle, started_at)?;

        let total = count.scalar_u64(COUNT_COLUMN).ok_or_else(|| {
            DbError::execution(
                format!(
                    "Count follow-up on connection: {} returned no '{}' value",
                    handle.connection_name(),
                    COUNT_COLUMN
                ),
                None,
                "Check the statement can be wrapped in a COUNT(*) subquery",
            )
        })?;
        debug!(connection = %handle.connection_name(), total, "Total count attached");
        result.set_total_count(total);
    }

    Ok(result)
}

/// Runs statements against one named connection.
///
/// Without a task each statement checks a handle out and returns it
/// afterwards. Bound to a task with [`in_task`](Self::in_task), statements
/// share the task's leased handle.
pub struct QueryExecutor<'m, F: PoolFactory> {
    manager: &'m DbManager<F>,
    connection: String,
    checkout_timeout: Duration,
    query_timeout: Duration,
    raw: bool,
    task: Option<&'m TaskScope>,
}

impl<'m, F: PoolFactory> QueryExecutor<'m, F> {
    pub(crate) fn new(
        manager: &'m DbManager<F>,
        connection: impl Into<String>,
        checkout_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            connection: connection.into(),
            checkout_timeout,
            query_timeout,
            raw: false,
            task: None,
        }
    }

    /// How long to wait for a handle.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn in_task(mut self, task: &'m TaskScope) -> Self {
        self.task = Some(task);
        self
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub async fn query(&self, descriptor: &QueryDescriptor) -> DbResult<QueryResult> {
        match self.task {
            Some(task) => {
                let handle = self
                    .manager
                    .lease_handle(task, &self.connection, self.checkout_timeout)
                    .await?;
                self.run(handle, descriptor).await
            }
            None => {
                self.manager
                    .with_handle(&self.connection, self.checkout_timeout, |handle| {
                        self.run(handle, descriptor)
                    })
                    .await
            }
        }
    }

    /// Shorthand for a raw statement without parameters.
    pub async fn query_sql(&self, sql: &str) -> DbResult<QueryResult> {
        self.query(&QueryDescriptor::raw(sql)).await
    }

    async fn run(
        &self,
        handle: Arc<HandleOf<F>>,
        descriptor: &QueryDescriptor,
    ) -> DbResult<QueryResult> {
        self.manager
            .execute(handle.as_ref(), descriptor, self.raw, self.query_timeout)
            .await
    }
}

impl<F: PoolFactory> std::fmt::Debug for QueryExecutor<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("connection", &self.connection)
            .field("checkout_timeout", &self.checkout_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("raw", &self.raw)
            .field("task", &self.task.map(TaskScope::id))
            .finish()
    }
}
