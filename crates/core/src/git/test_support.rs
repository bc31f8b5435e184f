//! Helpers for building small fixture repositories in unit tests.

use std::path::Path;

use git2::{IndexEntry, IndexTime, Oid, Repository, Signature, Time};

use super::store::{
    CommitIter, ConflictChoice, HistoryStore, NewCommit, PathConflict, TreeMerge, WalkOrder,
};
use super::GitClient;
use crate::errors::GitError;
use crate::models::{CommitRecord, ObjectId};

/// Bare repository whose HEAD points at `refs/heads/main`.
pub(crate) fn init_bare(path: &Path) -> Repository {
    let repo = Repository::init_bare(path).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    repo
}

/// Write a commit whose tree holds exactly `files` and move `main` to it.
///
/// Author and committer share `email` and `time`; the name is the local part
/// of the email.
pub(crate) fn commit_at(
    repo: &Repository,
    parents: &[Oid],
    email: &str,
    time: i64,
    files: &[(&str, &str)],
    message: &str,
) -> Oid {
    let mut index = git2::Index::new().unwrap();
    for (path, contents) in files {
        let blob = repo.blob(contents.as_bytes()).unwrap();
        index
            .add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: contents.len() as u32,
                id: blob,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })
            .unwrap();
    }
    let tree_id = index.write_tree_to(repo).unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let name = email.split('@').next().unwrap_or(email);
    let sig = Signature::new(name, email, &Time::new(time, 0)).unwrap();
    let parent_commits: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<_> = parent_commits.iter().collect();
    let oid = repo
        .commit(None, &sig, &sig, message, &tree, &parent_refs)
        .unwrap();
    repo.reference("refs/heads/main", oid, true, "test").unwrap();
    oid
}

/// Contents of `path` in `tree`, or `None` when the path is absent.
pub(crate) fn read_file(repo: &Repository, tree: &ObjectId, path: &str) -> Option<String> {
    let tree = repo.find_tree(Oid::from_str(tree.as_str()).unwrap()).unwrap();
    let entry = tree.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(String::from_utf8_lossy(blob.content()).into_owned())
}

/// Delegates to a [`GitClient`], but reports conflicts on `path` as having
/// lost both sides, so the resolver can only drop it.
pub(crate) struct SidelessConflicts<'a> {
    pub inner: &'a GitClient,
    pub path: &'static str,
}

impl HistoryStore for SidelessConflicts<'_> {
    fn resolve(&self, refname: &str) -> Result<ObjectId, GitError> {
        self.inner.resolve(refname)
    }

    fn read_commit(&self, id: &ObjectId) -> Result<CommitRecord, GitError> {
        self.inner.read_commit(id)
    }

    fn walk<'s>(&'s self, tip: &ObjectId, order: WalkOrder) -> Result<CommitIter<'s>, GitError> {
        self.inner.walk(tip, order)
    }

    fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, GitError> {
        self.inner.merge_base(a, b)
    }

    fn empty_tree(&self) -> Result<ObjectId, GitError> {
        self.inner.empty_tree()
    }

    fn merge_trees(
        &self,
        ancestor: &ObjectId,
        ours: &ObjectId,
        theirs: &ObjectId,
        resolve: &mut dyn FnMut(&PathConflict) -> ConflictChoice,
    ) -> Result<TreeMerge, GitError> {
        let mut masked = |conflict: &PathConflict| {
            if conflict.path == self.path {
                resolve(&PathConflict {
                    has_ours: false,
                    has_theirs: false,
                    ..conflict.clone()
                })
            } else {
                resolve(conflict)
            }
        };
        self.inner.merge_trees(ancestor, ours, theirs, &mut masked)
    }

    fn tree_with_file(
        &self,
        base: &ObjectId,
        path: &str,
        contents: &[u8],
    ) -> Result<ObjectId, GitError> {
        self.inner.tree_with_file(base, path, contents)
    }

    fn create_commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId, GitError> {
        self.inner.create_commit(commit)
    }

    fn create_branch(&self, name: &str, target: &ObjectId) -> Result<(), GitError> {
        self.inner.create_branch(name, target)
    }

    fn set_reference(&self, refname: &str, target: &ObjectId) -> Result<(), GitError> {
        self.inner.set_reference(refname, target)
    }

    fn push(
        &self,
        remote_url: &str,
        local_ref: &str,
        remote_ref: &str,
        force: bool,
    ) -> Result<(), GitError> {
        self.inner.push(remote_url, local_ref, remote_ref, force)
    }
}
