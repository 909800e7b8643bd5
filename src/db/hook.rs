//! Query instrumentation hook.

use crate::db::pool::DbHandle;
use crate::error::{BoxError, DbError, DbResult};
use crate::models::{QueryDescriptor, QueryResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Everything a hook gets to see about one completed statement.
pub struct QueryEvent<'a> {
    pub result: &'a QueryResult,
    /// Independent copy of the executed descriptor; safe to keep.
    pub descriptor: QueryDescriptor,
    pub handle: &'a dyn DbHandle,
    /// When the logical `execute` call started. Shared by a statement and
    /// its count follow-up.
    pub started_at: DateTime<Utc>,
    /// Time since `started_at`.
    pub elapsed: Duration,
}

impl std::fmt::Debug for QueryEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEvent")
            .field("descriptor", &self.descriptor)
            .field("handle", &self.handle.id())
            .field("connection", &self.handle.connection_name())
            .field("rows", &self.result.row_count())
            .field("started_at", &self.started_at)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// Callback invoked after every statement the manager executes.
pub type QueryHook = Arc<dyn Fn(&QueryEvent<'_>) -> Result<(), BoxError> + Send + Sync>;

/// Holds at most one hook.
#[derive(Default)]
pub struct HookSlot {
    hook: RwLock<Option<QueryHook>>,
}

impl HookSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, hook: QueryHook) {
        *self.hook.write() = Some(hook);
    }

    pub fn get(&self) -> Option<QueryHook> {
        self.hook.read().clone()
    }

    /// Get-or-set: with `Some`, install the hook and return it; with `None`,
    /// return the current hook untouched.
    pub fn replace(&self, hook: Option<QueryHook>) -> Option<QueryHook> {
        match hook {
            Some(hook) => {
                *self.hook.write() = Some(Arc::clone(&hook));
                Some(hook)
            }
            None => self.get(),
        }
    }

    /// Remove the hook, returning it.
    pub fn clear(&self) -> Option<QueryHook> {
        self.hook.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.hook.read().is_some()
    }

    /// Call the installed hook, if any. A hook failure surfaces as
    /// [`DbError::Hook`].
    pub(crate) fn notify(
        &self,
        result: &QueryResult,
        descriptor: &QueryDescriptor,
        handle: &dyn DbHandle,
        started_at: DateTime<Utc>,
    ) -> DbResult<()> {
        // Clone out so the hook runs without the lock held
        let Some(hook) = self.get() else {
            return Ok(());
        };
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        let event = QueryEvent {
            result,
            descriptor: descriptor.clone(),
            handle,
            started_at,
            elapsed,
        };
        hook(&event).map_err(DbError::hook)
    }
}

impl std::fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}
