//! Periodic background timers registered by pools.

use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

struct TimerEntry {
    label: String,
    handle: AbortHandle,
}

/// Owns every periodic task started on behalf of the manager's pools, so
/// they can all be cancelled at once.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<Vec<TimerEntry>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period`, starting one period from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_interval<F, Fut>(
        &self,
        label: impl Into<String>,
        period: Duration,
        mut tick: F,
    ) -> DbResult<AbortHandle>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(DbError::invalid_input("Timer period must be greater than 0"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DbError::internal(format!("Cannot start timer outside a runtime: {}", e)))?;

        let task = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        let label = label.into();
        debug!(timer = %label, period_ms = period.as_millis() as u64, "Timer registered");
        let handle = task.abort_handle();
        let mut timers = self.timers.lock();
        timers.retain(|t| !t.handle.is_finished());
        timers.push(TimerEntry {
            label,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Cancel every registered timer. Returns how many were still running.
    pub fn clear_all(&self) -> usize {
        let timers: Vec<TimerEntry> = std::mem::take(&mut *self.timers.lock());
        let mut cancelled = 0;
        for timer in timers {
            if !timer.handle.is_finished() {
                timer.handle.abort();
                cancelled += 1;
                debug!(timer = %timer.label, "Timer cancelled");
            }
        }
        cancelled
    }

    /// Number of timers still running.
    pub fn len(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timers = self.timers.lock();
        let labels: Vec<&str> = timers.iter().map(|t| t.label.as_str()).collect();
        f.debug_struct("TimerRegistry")
            .field("timers", &labels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_interval_ticks_until_cleared() {
        let timers = TimerRegistry::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        timers
            .spawn_interval("ticker", Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        assert_eq!(timers.clear_all(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_clear = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_clear);
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let timers = TimerRegistry::new();
        let result = timers.spawn_interval("bad", Duration::ZERO, || async {});
        assert!(result.is_err());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let timers = TimerRegistry::new();
        let result = timers.spawn_interval("orphan", Duration::from_secs(1), || async {});
        assert!(matches!(result, Err(DbError::Internal { .. })));
    }
}
