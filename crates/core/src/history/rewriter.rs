//! Reconciling source commits onto the amended lineage.

use tracing::{debug, instrument};

use crate::errors::GitError;
use crate::git::{ConflictChoice, HistoryStore, NewCommit, PathConflict};
use crate::models::{CommitRecord, ObjectId, Person, SyntheticIdentity};

/// Result of reconciling one source commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// The new amended tip, or `None` when nothing changed and no commit was
    /// written.
    pub commit: Option<CommitRecord>,
    pub conflicts_resolved: usize,
    pub dropped_paths: usize,
}

/// Remaining conflicts keep the source side, then the amended side, else the
/// path is dropped.
pub fn resolve_conflict(conflict: &PathConflict) -> ConflictChoice {
    if conflict.has_theirs {
        ConflictChoice::Theirs
    } else if conflict.has_ours {
        ConflictChoice::Ours
    } else {
        ConflictChoice::Drop
    }
}

/// Replays source commits onto `refs/heads/<branch>` with a three-way tree
/// merge that favors the source commit.
pub struct CommitRewriter<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
    branch_ref: String,
}

impl<'a, S: HistoryStore + ?Sized> CommitRewriter<'a, S> {
    pub fn new(store: &'a S, branch: &str) -> Self {
        Self {
            store,
            branch_ref: format!("refs/heads/{}", branch),
        }
    }

    /// Merge base tree for replaying `source` onto `tip`.
    ///
    /// When the common ancestor is a direct parent of `source`, its tree is
    /// the base. Otherwise the source diverged from the amended lineage (via a
    /// merge or side branch) and the amended tip's own parent tree is used.
    fn base_tree(&self, tip: &CommitRecord, source: &CommitRecord) -> Result<ObjectId, GitError> {
        if let Some(base) = self.store.merge_base(&tip.id, &source.id)? {
            if source.parents.contains(&base) {
                return Ok(self.store.read_commit(&base)?.tree);
            }
        }
        match tip.parents.first() {
            Some(parent) => Ok(self.store.read_commit(parent)?.tree),
            None => self.store.empty_tree(),
        }
    }

    /// Reconcile `source` onto `tip`.
    ///
    /// With an `identity`, author and committer are replaced by it while
    /// keeping the original timestamps; otherwise both are kept verbatim. The
    /// message is always the original. When `allow_empty` is false and the
    /// merged tree equals the tip's tree, no commit is written.
    #[instrument(skip_all, fields(source_commit = %source.id.short()))]
    pub fn reconcile(
        &self,
        tip: &CommitRecord,
        source: &CommitRecord,
        identity: Option<&SyntheticIdentity>,
        allow_empty: bool,
    ) -> Result<Reconciled, GitError> {
        let base = self.base_tree(tip, source)?;
        let merge = self
            .store
            .merge_trees(&base, &tip.tree, &source.tree, &mut resolve_conflict)?;

        for path in &merge.dropped {
            debug!(path = %path, source_commit = %source.id, "dropped unresolvable conflicting path");
        }
        let mut reconciled = Reconciled {
            commit: None,
            conflicts_resolved: merge.resolved.len(),
            dropped_paths: merge.dropped.len(),
        };

        if !allow_empty && merge.tree == tip.tree {
            debug!("reconciliation produced no change");
            return Ok(reconciled);
        }

        let (author, committer) = match identity {
            Some(id) => (
                rewrite_person(&source.author, id),
                rewrite_person(&source.committer, id),
            ),
            None => (source.author.clone(), source.committer.clone()),
        };
        let parents = [tip.id.clone()];
        let id = self.store.create_commit(&NewCommit {
            tree: &merge.tree,
            parents: &parents,
            author: &author,
            committer: &committer,
            message: &source.message,
        })?;
        self.store.set_reference(&self.branch_ref, &id)?;
        debug!(new_commit = %id.short(), rewritten = identity.is_some(), "reconciled commit");

        reconciled.commit = Some(CommitRecord {
            id,
            parents: parents.to_vec(),
            author,
            committer,
            tree: merge.tree,
            message: source.message.clone(),
        });
        Ok(reconciled)
    }
}

fn rewrite_person(original: &Person, identity: &SyntheticIdentity) -> Person {
    original.with_identity(&identity.login, &identity.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::{commit_at, init_bare, read_file, SidelessConflicts};
    use crate::git::GitClient;

    fn alice() -> SyntheticIdentity {
        SyntheticIdentity {
            login: "alice".into(),
            email: "alice@goat.test".into(),
            recency_threshold_days: Some(0),
            commit_secret: false,
        }
    }

    #[test]
    fn test_conflict_preference_order() {
        let conflict = |a, o, t| PathConflict {
            path: "f".into(),
            has_ancestor: a,
            has_ours: o,
            has_theirs: t,
        };
        assert_eq!(resolve_conflict(&conflict(true, true, true)), ConflictChoice::Theirs);
        assert_eq!(resolve_conflict(&conflict(true, true, false)), ConflictChoice::Ours);
        assert_eq!(resolve_conflict(&conflict(true, false, false)), ConflictChoice::Drop);
    }

    #[test]
    fn test_reconcile_direct_descendant_with_identity() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let a = commit_at(&repo, &[], "dev@x.test", 100, &[("f", "1")], "a");
        let b = commit_at(&repo, &[a], "dev@x.test", 200, &[("f", "2"), ("g", "new")], "b\n");
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &a.into()).unwrap();

        let tip = client.read_commit(&a.into()).unwrap();
        let source = client.read_commit(&b.into()).unwrap();
        let rewriter = CommitRewriter::new(&client, "amended");
        let out = rewriter.reconcile(&tip, &source, Some(&alice()), true).unwrap();

        let new = out.commit.unwrap();
        assert_eq!(new.tree, source.tree);
        assert_eq!(new.parents, vec![tip.id.clone()]);
        let stored = client.read_commit(&new.id).unwrap();
        assert_eq!(stored.author.email, "alice@goat.test");
        assert_eq!(stored.author.name, "alice");
        assert_eq!(stored.committer.email, "alice@goat.test");
        assert_eq!(stored.author.time, 200);
        assert_eq!(stored.message, "b\n");
        assert_eq!(client.resolve("refs/heads/amended").unwrap(), new.id);
    }

    #[test]
    fn test_reconcile_keeps_original_identity_without_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let a = commit_at(&repo, &[], "dev@x.test", 100, &[("f", "1")], "a");
        let b = commit_at(&repo, &[a], "other@x.test", 200, &[("f", "2")], "b");
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &a.into()).unwrap();

        let tip = client.read_commit(&a.into()).unwrap();
        let source = client.read_commit(&b.into()).unwrap();
        let out = CommitRewriter::new(&client, "amended")
            .reconcile(&tip, &source, None, true)
            .unwrap();
        let stored = client.read_commit(&out.commit.unwrap().id).unwrap();
        assert_eq!(stored.author, source.author);
        assert_eq!(stored.committer, source.committer);
    }

    #[test]
    fn test_reconcile_diverged_source_uses_tip_parent_base() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let root = commit_at(&repo, &[], "r@x.test", 100, &[("f", "root\n")], "root");
        let seed = commit_at(&repo, &[root], "s@x.test", 200, &[("f", "root\n"), ("s", "seed\n")], "seed");
        // Side commit based on root, not on the seed.
        let side = commit_at(&repo, &[root], "x@x.test", 300, &[("f", "side\n")], "side");
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &seed.into()).unwrap();

        let tip = client.read_commit(&seed.into()).unwrap();
        let source = client.read_commit(&side.into()).unwrap();
        let out = CommitRewriter::new(&client, "amended")
            .reconcile(&tip, &source, None, true)
            .unwrap();

        // merge-base(seed, side) = root, a parent of side: base is root's tree.
        let tree = out.commit.unwrap().tree;
        assert_eq!(read_file(&repo, &tree, "f").as_deref(), Some("side\n"));
        assert_eq!(read_file(&repo, &tree, "s").as_deref(), Some("seed\n"));
    }

    #[test]
    fn test_reconcile_conflict_favors_source() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let root = commit_at(&repo, &[], "r@x.test", 100, &[("f", "base\n")], "root");
        let ours = commit_at(&repo, &[root], "a@x.test", 200, &[("f", "ours\n")], "ours");
        let theirs = commit_at(&repo, &[root], "b@x.test", 300, &[("f", "theirs\n")], "theirs");
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &ours.into()).unwrap();

        let tip = client.read_commit(&ours.into()).unwrap();
        let source = client.read_commit(&theirs.into()).unwrap();
        let out = CommitRewriter::new(&client, "amended")
            .reconcile(&tip, &source, None, true)
            .unwrap();
        let tree = out.commit.unwrap().tree;
        assert_eq!(read_file(&repo, &tree, "f").as_deref(), Some("theirs\n"));
    }

    #[test]
    fn test_reconcile_without_change_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let a = commit_at(&repo, &[], "dev@x.test", 100, &[("f", "1")], "a");
        let b = commit_at(&repo, &[a], "dev@x.test", 200, &[("f", "1")], "same tree");
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &a.into()).unwrap();

        let tip = client.read_commit(&a.into()).unwrap();
        let source = client.read_commit(&b.into()).unwrap();
        let out = CommitRewriter::new(&client, "amended")
            .reconcile(&tip, &source, None, false)
            .unwrap();
        assert!(out.commit.is_none());
        assert_eq!(client.resolve("refs/heads/amended").unwrap(), tip.id);
    }

    /// Amended side edits `gone`, the source deletes it: a modify/delete
    /// conflict on `gone` with `keep` untouched.
    fn modify_delete_fixture(repo: &git2::Repository) -> (git2::Oid, git2::Oid) {
        let base = commit_at(repo, &[], "dev@x.test", 100, &[("gone", "1\n"), ("keep", "k\n")], "base");
        let ours = commit_at(repo, &[base], "dev@x.test", 200, &[("gone", "2\n"), ("keep", "k\n")], "ours");
        let theirs = commit_at(repo, &[base], "dev@x.test", 300, &[("keep", "k2\n")], "theirs");
        (ours, theirs)
    }

    #[test]
    fn test_reconcile_modify_delete_keeps_amended_side() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let (ours, theirs) = modify_delete_fixture(&repo);
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &ours.into()).unwrap();

        let tip = client.read_commit(&ours.into()).unwrap();
        let source = client.read_commit(&theirs.into()).unwrap();
        let out = CommitRewriter::new(&client, "amended")
            .reconcile(&tip, &source, None, true)
            .unwrap();
        assert_eq!(out.conflicts_resolved, 1);
        assert_eq!(out.dropped_paths, 0);
        let tree = out.commit.unwrap().tree;
        assert_eq!(read_file(&repo, &tree, "gone").as_deref(), Some("2\n"));
    }

    #[test]
    fn test_reconcile_counts_dropped_paths() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_bare(dir.path());
        let (ours, theirs) = modify_delete_fixture(&repo);
        let client = GitClient::new(dir.path()).unwrap();
        client.create_branch("amended", &ours.into()).unwrap();
        let store = SidelessConflicts {
            inner: &client,
            path: "gone",
        };

        let tip = store.read_commit(&ours.into()).unwrap();
        let source = store.read_commit(&theirs.into()).unwrap();
        let out = CommitRewriter::new(&store, "amended")
            .reconcile(&tip, &source, None, true)
            .unwrap();
        assert_eq!(out.dropped_paths, 1);
        assert_eq!(out.conflicts_resolved, 0);
        let tree = out.commit.unwrap().tree;
        assert_eq!(read_file(&repo, &tree, "gone"), None);
        assert_eq!(read_file(&repo, &tree, "keep").as_deref(), Some("k2\n"));
    }
}
