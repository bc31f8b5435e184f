//! Domain model types used throughout orgmimic.
//!
//! These types bridge the git object layer, the identity pipeline, the
//! history rewriter, and the run report printed by the CLI.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

// ---------------------------------------------------------------------------
// Object ids
// ---------------------------------------------------------------------------

/// Hex-encoded id of a git object (commit or tree).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Parse a full-length SHA-1 or SHA-256 hex id.
    pub fn from_hex(hex: &str) -> Result<Self, GitError> {
        let valid_len = hex.len() == 40 || hex.len() == 64;
        if !valid_len || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GitError::InvalidObjectId(hex.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// An author or committer stamp: identity plus the moment it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
    /// Timezone offset from UTC in minutes.
    pub offset_minutes: i32,
}

impl Person {
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.time, 0)
            .single()
            .unwrap_or_default()
    }

    /// Same moment, different identity.
    pub fn with_identity(&self, name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            time: self.time,
            offset_minutes: self.offset_minutes,
        }
    }
}

/// Read-only view of one commit in a repository's object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: ObjectId,
    /// Parent ids in order; the first parent is the mainline.
    pub parents: Vec<ObjectId>,
    pub author: Person,
    pub committer: Person,
    pub tree: ObjectId,
    pub message: String,
}

impl CommitRecord {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// The commit's timestamp used for ordering, windowing and recency.
    pub fn commit_time(&self) -> i64 {
        self.committer.time
    }

    /// Author email, if the commit carries a non-empty one.
    pub fn author_email(&self) -> Option<&str> {
        let email = self.author.email.trim();
        (!email.is_empty()).then_some(email)
    }
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// A source-repository contributor and their commit count inside the
/// observation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub email: String,
    pub commit_count: usize,
}

/// A configured fake user standing in for a real contributor in one target
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyntheticIdentity {
    pub login: String,
    pub email: String,
    /// Days since this identity's most recent visible commit. `None` means
    /// the identity never receives rewritten commits.
    pub recency_threshold_days: Option<u32>,
    /// Plant a fake secret commit under this identity after transplanting.
    #[serde(default)]
    pub commit_secret: bool,
}

impl SyntheticIdentity {
    /// Newest commit time (seconds) still old enough to be attributed to this
    /// identity, or `None` if the identity has no threshold.
    pub fn recency_cutoff(&self, now: DateTime<Utc>) -> Option<i64> {
        self.recency_threshold_days
            .map(|days| (now - chrono::Duration::days(i64::from(days))).timestamp())
    }
}

// ---------------------------------------------------------------------------
// Walk classification
// ---------------------------------------------------------------------------

/// How the history walker treats a single source commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitClass {
    /// Merge commit: never rewritten, never a seed.
    Skip,
    /// Mapped author, old enough for the mapped identity's threshold.
    RewriteEligible,
    /// Everything else.
    PassThrough,
}

impl fmt::Display for CommitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::RewriteEligible => write!(f, "rewrite_eligible"),
            Self::PassThrough => write!(f, "pass_through"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run reporting
// ---------------------------------------------------------------------------

/// Counters collected while transplanting one source→target pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStats {
    pub walked: usize,
    pub eligible: usize,
    pub pass_through: usize,
    pub skipped_merges: usize,
    /// Commits written onto the amended branch (excludes the seed).
    pub reconciled: usize,
    /// Merge commits whose reconciliation changed nothing.
    pub empty_reconciliations: usize,
    pub conflicts_resolved: usize,
    pub dropped_paths: usize,
    pub secrets_planted: usize,
}

/// Final state of one source→target pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    /// Pushed to the target's default branch.
    Published { branch: String, tip: String, rewritten: bool },
    /// Not attempted.
    Skipped { reason: String },
    /// Aborted; the error is already logged.
    Failed { error: String },
}

impl PairStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Outcome of one source→target pair within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairOutcome {
    pub target: String,
    pub source: String,
    pub status: PairStatus,
    pub stats: RewriteStats,
}

/// Outcome of transplanting every configured repository of one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub org: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pairs: Vec<PairOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.pairs.iter().filter(|p| p.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.status, PairStatus::Failed { .. }))
            .count()
    }

    /// Every pair published.
    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.pairs.len()
    }
}
