//! Utilities for table_sync

pub mod logging;

pub use logging::init_logging;
