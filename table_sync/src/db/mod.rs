//! Database module for table_sync
//!
//! Connections, the per-backend SQL dialect, and row value decoding.

pub mod connection;
pub mod dialect;
pub mod executor;
pub mod value;

// Re-export key types
pub use connection::{DatabaseConnection, DatabasePool};
pub use dialect::{Dialect, SqlQuery};
pub use executor::SqlExecutor;
pub use value::Value;
