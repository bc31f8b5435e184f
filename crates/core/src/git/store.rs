//! The git object operations the transplant engine depends on.
//!
//! [`HistoryStore`] is implemented by [`GitClient`](super::GitClient) on top
//! of `git2`; the ranking, walking and rewriting code only ever sees this
//! trait and the plain data types below.

use crate::errors::GitError;
use crate::models::{CommitRecord, ObjectId, Person};

/// Traversal order for [`HistoryStore::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// Newest commit first (by commit time).
    NewestFirst,
    /// Oldest commit first; every parent precedes its children.
    OldestFirst,
}

/// Commits yielded lazily by [`HistoryStore::walk`].
pub type CommitIter<'a> = Box<dyn Iterator<Item = Result<CommitRecord, GitError>> + 'a>;

/// One path left conflicted by a three-way tree merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub path: String,
    pub has_ancestor: bool,
    pub has_ours: bool,
    pub has_theirs: bool,
}

/// Which conflict stage survives into the merged tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Theirs,
    Ours,
    /// Leave the path out of the tree entirely.
    Drop,
}

/// Result of [`HistoryStore::merge_trees`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMerge {
    pub tree: ObjectId,
    /// Conflicted paths that were resolved to one side.
    pub resolved: Vec<String>,
    /// Conflicted paths that were dropped from the tree.
    pub dropped: Vec<String>,
}

/// Everything needed to write a new commit object.
#[derive(Debug, Clone)]
pub struct NewCommit<'a> {
    pub tree: &'a ObjectId,
    pub parents: &'a [ObjectId],
    pub author: &'a Person,
    pub committer: &'a Person,
    pub message: &'a str,
}

/// Git object access: walk, merge-base, tree merge, commit and ref creation,
/// push.
pub trait HistoryStore {
    /// Resolve a reference name (`HEAD`, `refs/heads/main`) to a commit id.
    fn resolve(&self, refname: &str) -> Result<ObjectId, GitError>;

    fn read_commit(&self, id: &ObjectId) -> Result<CommitRecord, GitError>;

    /// Best common ancestor of two commits, `None` for unrelated histories.
    fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, GitError>;

    /// Id of the empty tree.
    fn empty_tree(&self) -> Result<ObjectId, GitError>;

    /// Three-way merge of trees. Content conflicts favor `theirs`; any path
    /// still conflicted afterwards is handed to `resolve`.
    fn merge_trees(
        &self,
        ancestor: &ObjectId,
        ours: &ObjectId,
        theirs: &ObjectId,
        resolve: &mut dyn FnMut(&PathConflict) -> ConflictChoice,
    ) -> Result<TreeMerge, GitError>;

    /// Copy of `base` with one file added or replaced at `path`.
    fn tree_with_file(
        &self,
        base: &ObjectId,
        path: &str,
        contents: &[u8],
    ) -> Result<ObjectId, GitError>;

    /// Write a commit object without moving any ref.
    fn create_commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId, GitError>;

    /// Create `refs/heads/<name>`; fails with [`GitError::BranchExists`] if it
    /// is already there.
    fn create_branch(&self, name: &str, target: &ObjectId) -> Result<(), GitError>;

    /// Point a full reference name at `target`, creating or overwriting it.
    fn set_reference(&self, refname: &str, target: &ObjectId) -> Result<(), GitError>;

    /// Push `local_ref` to `remote_ref` at `remote_url`.
    fn push(
        &self,
        remote_url: &str,
        local_ref: &str,
        remote_ref: &str,
        force: bool,
    ) -> Result<(), GitError>;

    /// Every commit reachable from `tip`, each exactly once, in `order`.
    /// Commits are read as the iterator advances, so a caller that stops
    /// early never loads the rest of the history.
    fn walk<'s>(&'s self, tip: &ObjectId, order: WalkOrder) -> Result<CommitIter<'s>, GitError>;
}
