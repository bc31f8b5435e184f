//! Binding ranked source contributors to synthetic identities.
//!
//! [`AuthorMapping`] is the 1:1 assignment for one source repository and one
//! ordered identity list. [`IdentityMapper`] combines ranking with the
//! run-wide [`MappingCache`] so each source is ranked at most once per run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::cache::MappingCache;
use super::ranker::ContributorRanker;
use crate::errors::IdentityError;
use crate::git::HistoryStore;
use crate::models::{Contributor, ObjectId, SyntheticIdentity};

/// One assignment: a source contributor and the identity that replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedAuthor {
    pub source_email: String,
    pub commit_count: usize,
    pub identity: SyntheticIdentity,
}

/// Source author email -> synthetic identity, in identity declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorMapping {
    entries: Vec<MappedAuthor>,
    #[serde(skip)]
    by_email: HashMap<String, usize>,
}

impl AuthorMapping {
    /// Pair the i-th identity with the i-th ranked contributor until either
    /// list runs out.
    pub fn build(ranked: &[Contributor], identities: &[SyntheticIdentity]) -> Self {
        let entries: Vec<MappedAuthor> = identities
            .iter()
            .zip(ranked)
            .map(|(identity, contributor)| MappedAuthor {
                source_email: contributor.email.to_ascii_lowercase(),
                commit_count: contributor.commit_count,
                identity: identity.clone(),
            })
            .collect();
        let by_email = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.source_email.clone(), i))
            .collect();

        for unmatched in identities.iter().skip(entries.len()) {
            debug!(login = %unmatched.login, "identity has no source contributor");
        }
        Self { entries, by_email }
    }

    /// Identity standing in for `source_email` (case-insensitive).
    pub fn get(&self, source_email: &str) -> Option<&SyntheticIdentity> {
        self.by_email
            .get(&source_email.trim().to_ascii_lowercase())
            .map(|&i| &self.entries[i].identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappedAuthor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ranks sources and builds mappings through the shared cache.
#[derive(Clone)]
pub struct IdentityMapper {
    ranker: ContributorRanker,
    cache: MappingCache,
}

impl IdentityMapper {
    pub fn new(ranker: ContributorRanker, cache: MappingCache) -> Self {
        Self { ranker, cache }
    }

    pub fn cache(&self) -> &MappingCache {
        &self.cache
    }

    /// Mapping for `source_id` (`org/repo`) and `identities`.
    ///
    /// The source is only walked if no ranking for it is cached yet.
    pub fn mapping_for<S: HistoryStore + ?Sized>(
        &self,
        store: &S,
        tip: &ObjectId,
        source_id: &str,
        identities: &[SyntheticIdentity],
        now: DateTime<Utc>,
    ) -> Result<Arc<AuthorMapping>, IdentityError> {
        let ranked = self
            .cache
            .ranking_or_insert(source_id, || self.ranker.rank(store, tip, now))?;
        let mapping = self.cache.mapping_or_insert(source_id, identities, || {
            AuthorMapping::build(&ranked, identities)
        })?;
        info!(
            source = source_id,
            mapped = mapping.len(),
            identities = identities.len(),
            "author mapping ready"
        );
        Ok(mapping)
    }
}
