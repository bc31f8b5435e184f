//! Oldest-first replay of a source history onto the amended branch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::rewriter::CommitRewriter;
use crate::errors::{GitError, TransplantError};
use crate::git::{HistoryStore, WalkOrder};
use crate::identity::AuthorMapping;
use crate::models::{CommitClass, CommitRecord, ObjectId, RewriteStats};

/// What a completed walk leaves behind for the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Amended tip if rewriting started, otherwise the original tip.
    pub tip: CommitRecord,
    pub rewritten: bool,
    pub stats: RewriteStats,
}

/// Walks a source history oldest first, seeding the amended branch at the
/// first rewrite-eligible commit and reconciling every later commit onto it.
pub struct HistoryWalker<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
    mapping: &'a AuthorMapping,
    amended_branch: &'a str,
    target: &'a str,
    now: DateTime<Utc>,
}

impl<'a, S: HistoryStore + ?Sized> HistoryWalker<'a, S> {
    pub fn new(
        store: &'a S,
        mapping: &'a AuthorMapping,
        amended_branch: &'a str,
        target: &'a str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            mapping,
            amended_branch,
            target,
            now,
        }
    }

    pub fn classify(&self, commit: &CommitRecord) -> CommitClass {
        if commit.is_merge() {
            return CommitClass::Skip;
        }
        let eligible = commit
            .author_email()
            .and_then(|email| self.mapping.get(email))
            .and_then(|identity| identity.recency_cutoff(self.now))
            .is_some_and(|cutoff| commit.commit_time() < cutoff);
        if eligible {
            CommitClass::RewriteEligible
        } else {
            CommitClass::PassThrough
        }
    }

    fn seed(&self, commit: &CommitRecord) -> Result<(), TransplantError> {
        self.store
            .create_branch(self.amended_branch, &commit.id)
            .map_err(|e| match e {
                GitError::BranchExists(branch) => TransplantError::BranchCollision {
                    branch,
                    repo: self.target.to_string(),
                },
                other => other.into(),
            })?;
        info!(
            target = self.target,
            seed = %commit.id.short(),
            branch = self.amended_branch,
            "rewriting started"
        );
        Ok(())
    }

    /// Reconcile `commit` onto `current`, returning the new amended tip.
    fn replay(
        &self,
        rewriter: &CommitRewriter<'_, S>,
        current: CommitRecord,
        commit: &CommitRecord,
        class: CommitClass,
        stats: &mut RewriteStats,
    ) -> Result<CommitRecord, TransplantError> {
        let identity = match class {
            CommitClass::RewriteEligible => {
                let email = commit.author_email().unwrap_or_default();
                Some(
                    self.mapping
                        .get(email)
                        .ok_or_else(|| TransplantError::MissingMapping(email.to_string()))?,
                )
            }
            _ => None,
        };
        let reconciled =
            rewriter.reconcile(&current, commit, identity, class != CommitClass::Skip)?;
        stats.conflicts_resolved += reconciled.conflicts_resolved;
        stats.dropped_paths += reconciled.dropped_paths;
        match reconciled.commit {
            Some(next) => {
                stats.reconciled += 1;
                Ok(next)
            }
            None => {
                stats.empty_reconciliations += 1;
                Ok(current)
            }
        }
    }

    /// Ids of `seed` and everything reachable from it.
    fn ancestry(&self, seed: &ObjectId) -> Result<HashSet<ObjectId>, TransplantError> {
        let mut ids = HashSet::new();
        for commit in self.store.walk(seed, WalkOrder::NewestFirst)? {
            ids.insert(commit?.id);
        }
        Ok(ids)
    }

    /// Walk `tip` oldest first. Commits seen before the seed that are not its
    /// ancestors (side branches merged later) are replayed right after it.
    #[instrument(skip(self), fields(target = self.target))]
    pub fn run(&self, tip: &ObjectId) -> Result<WalkOutcome, TransplantError> {
        let commits = self
            .store
            .walk(tip, WalkOrder::OldestFirst)?
            .collect::<Result<Vec<_>, _>>()?;
        let rewriter = CommitRewriter::new(self.store, self.amended_branch);
        let mut stats = RewriteStats::default();
        let mut amended: Option<CommitRecord> = None;
        let mut pending: Vec<(CommitRecord, CommitClass)> = Vec::new();

        for commit in commits {
            stats.walked += 1;
            let class = self.classify(&commit);
            match class {
                CommitClass::Skip => stats.skipped_merges += 1,
                CommitClass::RewriteEligible => stats.eligible += 1,
                CommitClass::PassThrough => stats.pass_through += 1,
            }

            amended = match amended.take() {
                Some(current) => Some(self.replay(&rewriter, current, &commit, class, &mut stats)?),
                None if class == CommitClass::RewriteEligible => {
                    self.seed(&commit)?;
                    let ancestry = self.ancestry(&commit.id)?;
                    let mut current = commit;
                    for (earlier, earlier_class) in pending.drain(..) {
                        if ancestry.contains(&earlier.id) {
                            continue;
                        }
                        debug!(commit = %earlier.id.short(), "replaying side commit older than the seed");
                        current = self.replay(&rewriter, current, &earlier, earlier_class, &mut stats)?;
                    }
                    Some(current)
                }
                None => {
                    pending.push((commit, class));
                    None
                }
            };
        }

        let original_tip = match &amended {
            Some(_) => None,
            None => pending.pop().map(|(commit, _)| commit).filter(|c| c.id == *tip),
        };
        let outcome = match (amended, original_tip) {
            (Some(tip), _) => WalkOutcome {
                tip,
                rewritten: true,
                stats,
            },
            (None, Some(tip)) => {
                debug!("no rewrite-eligible commits, publishing source history unchanged");
                WalkOutcome {
                    tip,
                    rewritten: false,
                    stats,
                }
            }
            (None, None) => {
                // The tip is always part of its own walk.
                return Err(GitError::RefNotFound(tip.to_string()).into());
            }
        };
        info!(
            walked = outcome.stats.walked,
            eligible = outcome.stats.eligible,
            reconciled = outcome.stats.reconciled,
            dropped_paths = outcome.stats.dropped_paths,
            rewritten = outcome.rewritten,
            "history walk complete"
        );
        Ok(outcome)
    }
}
