//! Per-connection database access manager.
//!
//! Named connections are registered once; pools are built lazily on first
//! use and handles are either leased to a [`TaskScope`] or checked out for a
//! single operation. Every statement can be observed through a query hook,
//! and statements marked with `SQL_CALC_FOUND_ROWS` get a total-count
//! follow-up on the same handle.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{DbHandle, DbManager, QueryEvent, QueryHook, ResourcePool, TaskScope};
pub use error::{BoxError, DbError, DbResult};
pub use models::{QueryDescriptor, QueryParam, QueryResult, Select};
