//! Fake secret pool and secret-commit planting.
//!
//! Secrets are stored on disk as `*.encoded` files, base64-encoded three
//! times so the raw values never appear in this repository's own tree.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, instrument};

use crate::errors::{GitError, SecretError};
use crate::git::{HistoryStore, NewCommit};
use crate::models::{CommitRecord, Person, SyntheticIdentity};

const ENCODING_ROUNDS: usize = 3;

/// Decoded secrets handed out round-robin.
#[derive(Debug, Default)]
pub struct SecretPool {
    secrets: Vec<String>,
    next: AtomicUsize,
}

impl SecretPool {
    /// Load every `*.encoded` file in `dir`, in file name order.
    pub fn load(dir: &Path) -> Result<Self, SecretError> {
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "encoded"))
            .collect();
        files.sort();

        let mut secrets = Vec::with_capacity(files.len());
        for path in &files {
            let contents = std::fs::read(path)?;
            let file = path.display().to_string();
            secrets.push(decode_secret(&contents).map_err(|detail| SecretError::Decode {
                file,
                detail,
            })?);
        }
        info!(dir = %dir.display(), count = secrets.len(), "loaded secret pool");
        Ok(Self::from_secrets(secrets))
    }

    pub fn from_secrets(secrets: Vec<String>) -> Self {
        Self {
            secrets,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Next secret, wrapping around after the last one.
    pub fn next_secret(&self) -> Option<&str> {
        if self.secrets.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.secrets.len();
        Some(&self.secrets[i])
    }
}

fn decode_secret(raw: &[u8]) -> Result<String, String> {
    let mut data = raw.to_vec();
    for _ in 0..ENCODING_ROUNDS {
        data.retain(|b| !b.is_ascii_whitespace());
        data = STANDARD.decode(&data).map_err(|e| e.to_string())?;
    }
    String::from_utf8(data).map_err(|e| e.to_string())
}

/// Writes one commit adding a secret file on top of a tip.
pub struct SecretPlanter<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: HistoryStore + ?Sized> SecretPlanter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn plant(
        &self,
        tip: &CommitRecord,
        identity: &SyntheticIdentity,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<CommitRecord, GitError> {
        self.plant_with_rng(tip, identity, secret, now, &mut rand::thread_rng())
    }

    /// New commit whose only change is `secret_<7 letters>.txt`, authored by
    /// `identity` `threshold + 1..=10` days before `now`.
    #[instrument(skip_all, fields(login = %identity.login, tip = %tip.id.short()))]
    pub fn plant_with_rng<R: Rng + ?Sized>(
        &self,
        tip: &CommitRecord,
        identity: &SyntheticIdentity,
        secret: &str,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<CommitRecord, GitError> {
        let filename = format!("secret_{}.txt", random_letters(rng, 7));
        let days_back = i64::from(identity.recency_threshold_days.unwrap_or(0)) + rng.gen_range(1..=10);
        let when = (now - Duration::days(days_back)).timestamp();

        let tree = self
            .store
            .tree_with_file(&tip.tree, &filename, secret.as_bytes())?;
        let person = Person {
            name: identity.login.clone(),
            email: identity.email.clone(),
            time: when,
            offset_minutes: 0,
        };
        let message = format!("orgmimic generated secret {}", random_letters(rng, 5));
        let parents = [tip.id.clone()];
        let id = self.store.create_commit(&NewCommit {
            tree: &tree,
            parents: &parents,
            author: &person,
            committer: &person,
            message: &message,
        })?;
        debug!(file = %filename, commit = %id.short(), "planted secret");

        Ok(CommitRecord {
            id,
            parents: parents.to_vec(),
            author: person.clone(),
            committer: person,
            tree,
            message,
        })
    }
}

fn random_letters<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    (0..n).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}
