//! Database access layer.
//!
//! - `registry`: connection name to configuration
//! - `pool`: the pool and handle traits the manager is written against
//! - `directory`: lazily built pools, one per connection name
//! - `task` / `lease`: unit-of-work scopes and the handles leased to them
//! - `executor` / `hook`: statement execution and instrumentation
//! - `sqlx_pool` / `types`: the sqlx backend and its row decoding
//! - `manager`: the context object tying it all together

pub mod directory;
pub mod executor;
pub mod hook;
pub mod lease;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod sqlx_pool;
pub mod task;
pub mod timer;
pub mod types;

pub use directory::PoolDirectory;
pub use executor::QueryExecutor;
pub use hook::{HookSlot, QueryEvent, QueryHook};
pub use lease::LeaseContext;
pub use manager::DbManager;
pub use pool::{DbHandle, HandleOf, PoolFactory, PoolStats, ResourcePool};
pub use registry::ConnectionRegistry;
pub use sqlx_pool::{DbPool, SqlxHandle, SqlxPool, SqlxPoolFactory};
pub use task::{TaskId, TaskScope};
pub use timer::TimerRegistry;
