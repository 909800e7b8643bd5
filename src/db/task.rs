//! Unit-of-work scopes with deferred completion callbacks.
//!
//! A [`TaskScope`] stands for one logical unit of work. Anything that must
//! happen when the work finishes (returning leased handles, mostly) is
//! registered with [`TaskScope::defer`] and runs when the scope completes.
//!
//! Callbacks run in reverse registration order, exactly once. Completing a
//! scope explicitly with [`TaskScope::complete`] is preferred; a scope
//! dropped without completing hands its callbacks to the runtime instead.
//!
//! A scope dropped outside any tokio runtime cannot run its callbacks: they
//! are discarded with a warning, and handles leased to it are not returned.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Identifier of a task scope, unique within the process.
pub type TaskId = u64;

type Deferred = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// One unit of work and the callbacks to run when it ends.
///
/// Call [`complete`](Self::complete) before dropping. The `Drop` fallback
/// needs a tokio runtime; without one, pending callbacks are skipped.
pub struct TaskScope {
    id: TaskId,
    deferred: Mutex<Vec<Deferred>>,
    completed: AtomicBool,
}

impl TaskScope {
    pub fn new() -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            deferred: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Number of callbacks waiting for completion.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Register `callback` to run when this scope completes.
    ///
    /// On an already completed scope the callback is spawned right away.
    pub fn defer<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deferred: Deferred = Box::new(move || callback().boxed());
        {
            let mut pending = self.deferred.lock();
            if !self.is_completed() {
                pending.push(deferred);
                return;
            }
        }
        warn!(task = self.id, "Callback deferred on a completed task, running now");
        spawn_callbacks(self.id, vec![deferred]);
    }

    /// Run every deferred callback, newest first. Later calls do nothing.
    pub async fn complete(&self) {
        let callbacks = {
            let mut pending = self.deferred.lock();
            if self.completed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *pending)
        };
        debug!(task = self.id, callbacks = callbacks.len(), "Completing task");
        for callback in callbacks.into_iter().rev() {
            callback().await;
        }
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(self.deferred.get_mut());
        if callbacks.is_empty() {
            return;
        }
        warn!(
            task = self.id,
            callbacks = callbacks.len(),
            "Task dropped without completing - consider calling complete()"
        );
        spawn_callbacks(self.id, callbacks);
    }
}

fn spawn_callbacks(task: TaskId, callbacks: Vec<Deferred>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                for callback in callbacks.into_iter().rev() {
                    callback().await;
                }
            });
        }
        Err(_) => {
            warn!(
                task,
                callbacks = callbacks.len(),
                "No runtime available, deferred callbacks skipped"
            );
        }
    }
}
