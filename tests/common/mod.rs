//! Test doubles for the pool traits.
//!
//! `MockFactory` builds semaphore-bounded pools whose handles record every
//! statement they execute. Shared counters track pools built, checkouts and
//! returns so tests can assert that every handle comes back exactly once.

#![allow(dead_code)]

use async_trait::async_trait;
use db_manager::config::PoolOptions;
use db_manager::db::{DbHandle, DbManager, PoolFactory, PoolStats, ResourcePool, TimerRegistry};
use db_manager::error::{DbError, DbResult};
use db_manager::models::{
    ColumnMetadata, ConnectionConfig, QueryDescriptor, QueryResult, Statement,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How mock handles answer.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Value returned by count follow-ups
    pub total: u64,
    pub fail_primary: bool,
    pub fail_count: bool,
}

#[derive(Debug, Clone)]
pub struct Executed {
    pub handle: u64,
    pub descriptor: QueryDescriptor,
    pub raw: bool,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub pools_created: AtomicUsize,
    pub checkouts: AtomicUsize,
    pub returns: AtomicUsize,
    pub resets: AtomicUsize,
    pub executed: Mutex<Vec<Executed>>,
}

impl Counters {
    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn returns(&self) -> usize {
        self.returns.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().clone()
    }
}

pub struct MockFactory {
    pub capacity: usize,
    pub script: Script,
    /// Register a long-period timer per pool, like a health check.
    pub with_timer: bool,
    pub counters: Arc<Counters>,
}

impl MockFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            script: Script::default(),
            with_timer: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    pub fn with_timer(mut self) -> Self {
        self.with_timer = true;
        self
    }
}

impl PoolFactory for MockFactory {
    type Pool = MockPool;

    fn create(&self, config: &ConnectionConfig, timers: &TimerRegistry) -> DbResult<MockPool> {
        self.counters.pools_created.fetch_add(1, Ordering::SeqCst);
        if self.with_timer {
            timers.spawn_interval(
                format!("mock:{}", config.name),
                Duration::from_secs(3600),
                || async {},
            )?;
        }
        Ok(MockPool {
            instance: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            name: config.name.clone(),
            capacity: self.capacity,
            permits: Arc::new(Semaphore::new(self.capacity)),
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        })
    }
}

#[derive(Debug)]
pub struct MockPool {
    pub instance: u64,
    name: String,
    capacity: usize,
    permits: Arc<Semaphore>,
    script: Script,
    counters: Arc<Counters>,
}

#[async_trait]
impl ResourcePool for MockPool {
    type Handle = MockHandle;

    async fn checkout(&self, timeout: Duration) -> DbResult<Arc<MockHandle>> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DbError::connection("Connection pool is closed", "Reset the pool"));
            }
            Err(_) => return Err(DbError::pool_timeout(&self.name, "checkout", timeout)),
        };
        self.counters.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockHandle {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            connection_name: self.name.clone(),
            permit: Mutex::new(Some(permit)),
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn release(&self, handle: Arc<MockHandle>) {
        if handle.permit.lock().take().is_some() {
            self.counters.returns.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn reset(&self) {
        self.permits.close();
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> PoolStats {
        let idle = self.permits.available_permits() as u32;
        PoolStats {
            size: self.capacity as u32,
            idle,
            checked_out: self.capacity as u32 - idle,
        }
    }
}

#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    connection_name: String,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    script: Script,
    counters: Arc<Counters>,
}

#[async_trait]
impl DbHandle for MockHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn connection_name(&self) -> &str {
        &self.connection_name
    }

    async fn execute(
        &self,
        descriptor: &QueryDescriptor,
        raw: bool,
        _timeout: Duration,
    ) -> DbResult<QueryResult> {
        self.counters.executed.lock().push(Executed {
            handle: self.id,
            descriptor: descriptor.clone(),
            raw,
        });

        let is_count = matches!(descriptor.statement(), Statement::Count(_));
        if is_count {
            if self.script.fail_count {
                return Err(DbError::execution("count failed", None, "none"));
            }
            let row = json!({ "count": self.script.total });
            return Ok(QueryResult::with_rows(
                vec![ColumnMetadata::new("count", "BIGINT")],
                vec![row.as_object().cloned().unwrap_or_default()],
                0,
            ));
        }

        if self.script.fail_primary {
            return Err(DbError::execution("primary failed", None, "none"));
        }
        let row = json!({ "id": 1, "handle": self.id });
        Ok(QueryResult::with_rows(
            vec![ColumnMetadata::new("id", "INT")],
            vec![row.as_object().cloned().unwrap_or_default()],
            0,
        ))
    }
}

pub fn config(name: &str) -> ConnectionConfig {
    ConnectionConfig::new(name, "sqlite::memory:", PoolOptions::default()).unwrap()
}

/// A manager over mock pools with `names` registered.
pub fn mock_manager(factory: MockFactory, names: &[&str]) -> (DbManager<MockFactory>, Arc<Counters>) {
    let counters = Arc::clone(&factory.counters);
    let manager = DbManager::new(factory);
    for name in names {
        manager.add_connection(config(name));
    }
    (manager, counters)
}

pub const SHORT: Duration = Duration::from_millis(50);
pub const LONG: Duration = Duration::from_secs(2);
