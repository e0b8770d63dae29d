//! Persistence bootstrap: connection pool and hand-rolled migration runner.

pub mod migrations;
pub mod pool;

pub use pool::{Database, PoolStats};
