//! The history pipeline: the oldest-first walk that builds the amended
//! lineage, per-commit reconciliation, and publishing.

pub mod publisher;
pub mod rewriter;
pub mod walker;

pub use publisher::BranchPublisher;
pub use rewriter::{CommitRewriter, Reconciled};
pub use walker::{HistoryWalker, WalkOutcome};
