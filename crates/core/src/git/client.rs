//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};

use git2::{
    BranchType, Cred, ErrorCode, FetchOptions, FetchPrune, FileFavor, IndexConflict, IndexEntry,
    IndexTime, MergeOptions, Oid, PushOptions, RemoteCallbacks, Repository, Signature, Sort, Time,
};
use tracing::{debug, info, instrument, warn};

use super::store::{
    CommitIter, ConflictChoice, HistoryStore, NewCommit, PathConflict, TreeMerge, WalkOrder,
};
use crate::errors::GitError;
use crate::models::{CommitRecord, ObjectId, Person};

/// Stage bits of an index entry's flags (0 = merged, 1-3 = conflict stages).
const INDEX_STAGE_MASK: u16 = 0x3000;

/// Blob file mode for regular files.
const BLOB_MODE: u32 = 0o100644;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    token: Option<String>,
}

fn to_oid(id: &ObjectId) -> Result<Oid, GitError> {
    Oid::from_str(id.as_str()).map_err(|_| GitError::InvalidObjectId(id.to_string()))
}

fn to_person(sig: &Signature<'_>) -> Person {
    Person {
        name: String::from_utf8_lossy(sig.name_bytes()).into_owned(),
        email: String::from_utf8_lossy(sig.email_bytes()).into_owned(),
        time: sig.when().seconds(),
        offset_minutes: sig.when().offset_minutes(),
    }
}

fn to_signature(person: &Person) -> Result<Signature<'static>, GitError> {
    let when = Time::new(person.time, person.offset_minutes);
    Ok(Signature::new(&person.name, &person.email, &when)?)
}

/// Credential callbacks for HTTPS remotes authenticated with a token.
fn remote_callbacks<'a>(token: Option<&str>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &tok)
        });
    }
    callbacks
}

#[cfg(unix)]
fn entry_path(raw: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(raw))
}

#[cfg(not(unix))]
fn entry_path(raw: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

impl GitClient {
    /// Open an existing Git repository (bare or not) at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            token: None,
        })
    }

    /// Clone `url` into `path`. `url` may be a remote URL or a local path.
    #[instrument(skip(token), fields(url = %url, path = %path.display()))]
    pub fn clone_repo(
        url: &str,
        path: &Path,
        token: Option<&str>,
        bare: bool,
    ) -> Result<Self, GitError> {
        info!("cloning git repository");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(token));
        let mut builder = git2::build::RepoBuilder::new();
        builder.bare(bare).fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            token: token.map(str::to_string),
        })
    }

    /// Attach a token used for subsequent fetches and pushes.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Refresh every local branch from `origin`, overwriting local state.
    ///
    /// Used on cached bare clones, where local branches mirror the remote.
    #[instrument(skip(self), fields(path = %self.repo_path.display()))]
    pub fn fetch_branches(&self) -> Result<(), GitError> {
        info!("fetching");
        let mut remote = self.repo.find_remote("origin")?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(self.token.as_deref()));
        fetch_opts.prune(FetchPrune::On);
        remote.fetch(&["+refs/heads/*:refs/heads/*"], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    /// Tip of HEAD.
    pub fn head(&self) -> Result<ObjectId, GitError> {
        self.resolve("HEAD")
    }

    /// Short name of the branch HEAD points at, if any.
    pub fn head_branch(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(str::to_string))
    }

    /// List all local branch names.
    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let branches = self.repo.branches(Some(BranchType::Local))?;
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Choose the surviving entry for one conflict and put it back at stage 0.
    fn resolve_conflict(
        &self,
        index: &mut git2::Index,
        conflict: IndexConflict,
        resolve: &mut dyn FnMut(&PathConflict) -> ConflictChoice,
        merge: &mut TreeMerge,
    ) -> Result<(), GitError> {
        let raw_path = match conflict
            .their
            .as_ref()
            .or(conflict.our.as_ref())
            .or(conflict.ancestor.as_ref())
        {
            Some(entry) => entry.path.clone(),
            None => return Ok(()),
        };
        let display = String::from_utf8_lossy(&raw_path).into_owned();
        let choice = resolve(&PathConflict {
            path: display.clone(),
            has_ancestor: conflict.ancestor.is_some(),
            has_ours: conflict.our.is_some(),
            has_theirs: conflict.their.is_some(),
        });

        // Rename conflicts can spread one conflict across several paths.
        let mut stage_paths: Vec<Vec<u8>> = [&conflict.ancestor, &conflict.our, &conflict.their]
            .into_iter()
            .flatten()
            .map(|entry| entry.path.clone())
            .collect();
        stage_paths.sort();
        stage_paths.dedup();
        for path in &stage_paths {
            let path = entry_path(path);
            for stage in 1..=3 {
                match index.remove(&path, stage) {
                    Ok(()) => {}
                    Err(e) if e.code() == ErrorCode::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let keep = match choice {
            ConflictChoice::Theirs => conflict.their,
            ConflictChoice::Ours => conflict.our,
            ConflictChoice::Drop => None,
        };
        match keep {
            Some(mut entry) => {
                entry.flags &= !INDEX_STAGE_MASK;
                index.add(&entry)?;
                merge.resolved.push(display);
            }
            None => merge.dropped.push(display),
        }
        Ok(())
    }
}

impl HistoryStore for GitClient {
    fn resolve(&self, refname: &str) -> Result<ObjectId, GitError> {
        let object = self
            .repo
            .revparse_single(refname)
            .map_err(|_| GitError::RefNotFound(refname.to_string()))?;
        Ok(object.peel_to_commit()?.id().into())
    }

    fn read_commit(&self, id: &ObjectId) -> Result<CommitRecord, GitError> {
        let commit = self.repo.find_commit(to_oid(id)?)?;
        let record = CommitRecord {
            id: commit.id().into(),
            parents: commit.parent_ids().map(ObjectId::from).collect(),
            author: to_person(&commit.author()),
            committer: to_person(&commit.committer()),
            tree: commit.tree_id().into(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        };
        Ok(record)
    }

    fn walk<'s>(&'s self, tip: &ObjectId, order: WalkOrder) -> Result<CommitIter<'s>, GitError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(match order {
            WalkOrder::NewestFirst => Sort::TIME,
            WalkOrder::OldestFirst => Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE,
        })?;
        revwalk.push(to_oid(tip)?)?;
        Ok(Box::new(revwalk.map(move |oid| {
            let oid = oid?;
            self.read_commit(&oid.into())
        })))
    }

    fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, GitError> {
        match self.repo.merge_base(to_oid(a)?, to_oid(b)?) {
            Ok(oid) => Ok(Some(oid.into())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn empty_tree(&self) -> Result<ObjectId, GitError> {
        Ok(self.repo.treebuilder(None)?.write()?.into())
    }

    fn merge_trees(
        &self,
        ancestor: &ObjectId,
        ours: &ObjectId,
        theirs: &ObjectId,
        resolve: &mut dyn FnMut(&PathConflict) -> ConflictChoice,
    ) -> Result<TreeMerge, GitError> {
        let ancestor_tree = self.repo.find_tree(to_oid(ancestor)?)?;
        let our_tree = self.repo.find_tree(to_oid(ours)?)?;
        let their_tree = self.repo.find_tree(to_oid(theirs)?)?;

        let mut opts = MergeOptions::new();
        opts.file_favor(FileFavor::Theirs);
        let mut index = self
            .repo
            .merge_trees(&ancestor_tree, &our_tree, &their_tree, Some(&opts))?;

        let mut merge = TreeMerge {
            tree: ObjectId::from(Oid::zero()),
            resolved: Vec::new(),
            dropped: Vec::new(),
        };
        if index.has_conflicts() {
            let conflicts = index
                .conflicts()?
                .collect::<Result<Vec<IndexConflict>, git2::Error>>()?;
            for conflict in conflicts {
                self.resolve_conflict(&mut index, conflict, resolve, &mut merge)?;
            }
        }

        merge.tree = index.write_tree_to(&self.repo)?.into();
        Ok(merge)
    }

    fn tree_with_file(
        &self,
        base: &ObjectId,
        path: &str,
        contents: &[u8],
    ) -> Result<ObjectId, GitError> {
        let base_tree = self.repo.find_tree(to_oid(base)?)?;
        let mut index = git2::Index::new()?;
        index.read_tree(&base_tree)?;
        let blob = self.repo.blob(contents)?;
        index.add(&IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: BLOB_MODE,
            uid: 0,
            gid: 0,
            file_size: u32::try_from(contents.len()).unwrap_or(u32::MAX),
            id: blob,
            flags: 0,
            flags_extended: 0,
            path: path.as_bytes().to_vec(),
        })?;
        Ok(index.write_tree_to(&self.repo)?.into())
    }

    fn create_commit(&self, commit: &NewCommit<'_>) -> Result<ObjectId, GitError> {
        let tree = self.repo.find_tree(to_oid(commit.tree)?)?;
        let parents = commit
            .parents
            .iter()
            .map(|id| Ok(self.repo.find_commit(to_oid(id)?)?))
            .collect::<Result<Vec<git2::Commit<'_>>, GitError>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let author = to_signature(commit.author)?;
        let committer = to_signature(commit.committer)?;
        let oid = self.repo.commit(
            None,
            &author,
            &committer,
            commit.message,
            &tree,
            &parent_refs,
        )?;
        debug!(sha = %oid, "created commit");
        Ok(oid.into())
    }

    #[instrument(skip(self), fields(target = %target))]
    fn create_branch(&self, name: &str, target: &ObjectId) -> Result<(), GitError> {
        if self.repo.find_branch(name, BranchType::Local).is_ok() {
            return Err(GitError::BranchExists(name.to_string()));
        }
        let commit = self.repo.find_commit(to_oid(target)?)?;
        match self.repo.branch(name, &commit, false) {
            Ok(_) => {
                info!(name, "created branch");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::Exists => Err(GitError::BranchExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn set_reference(&self, refname: &str, target: &ObjectId) -> Result<(), GitError> {
        self.repo
            .reference(refname, to_oid(target)?, true, "orgmimic: update ref")?;
        Ok(())
    }

    #[instrument(skip(self, remote_url))]
    fn push(
        &self,
        remote_url: &str,
        local_ref: &str,
        remote_ref: &str,
        force: bool,
    ) -> Result<(), GitError> {
        info!("pushing");
        let refspec = format!(
            "{}{}:{}",
            if force { "+" } else { "" },
            local_ref,
            remote_ref
        );
        let mut remote = self.repo.remote_anonymous(remote_url)?;
        let mut rejection: Option<String> = None;
        {
            let mut callbacks = remote_callbacks(self.token.as_deref());
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    rejection = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut push_opts))?;
        }
        if let Some(detail) = rejection {
            return Err(GitError::PushRejected { refspec, detail });
        }
        info!("push completed");
        Ok(())
    }
}
