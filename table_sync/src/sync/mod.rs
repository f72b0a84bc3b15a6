//! Row synchronization
//!
//! Computes the differences between two key-ordered row streams with a merge
//! join and applies them to the destination in bounded batches.

pub mod applier;
pub mod classifier;
pub mod cursor;
pub mod differ;
pub mod orchestrator;
pub mod query;

// Re-export key types
pub use applier::BatchApplier;
pub use classifier::{classify, ChangeType};
pub use cursor::{HashedRow, MemoryCursor, RowCursor, RowLayout, StreamCursor};
pub use differ::{diff, ChangeCounts, Changeset};
pub use orchestrator::{ConstraintGuard, SkipReason, SyncReport, Synchronizer, TableReport};
