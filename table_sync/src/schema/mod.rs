//! Schema module for table_sync
//!
//! This module handles catalog analysis and the intersection of two table
//! definitions.

pub mod analyzer;
pub mod lcd;
pub mod types;

// Re-export key types
pub use analyzer::SchemaAnalyzer;
pub use lcd::lcd;
pub use types::{Column, DatabaseSchema, Key, Table};
