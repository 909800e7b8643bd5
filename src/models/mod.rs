//! Data models for the database manager.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod descriptor;
pub mod query;

pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use descriptor::{
    CALC_FOUND_ROWS, COUNT_COLUMN, Filter, FilterOp, QueryDescriptor, RenderedQuery, Select,
    SortOrder, Statement,
};
pub use query::{ColumnMetadata, QueryParam, QueryResult};
