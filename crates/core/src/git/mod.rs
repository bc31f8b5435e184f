//! Git operations for orgmimic.

pub mod client;
pub mod github;
pub mod remote_url;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::GitClient;
pub use github::GitHubClient;
pub use store::{CommitIter, ConflictChoice, HistoryStore, NewCommit, PathConflict, TreeMerge, WalkOrder};
