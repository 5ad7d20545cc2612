//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod engine;
pub mod flow;
pub mod pool;
pub(crate) mod rows;
pub mod subject;
