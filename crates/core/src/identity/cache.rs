//! Run-wide memoization of rankings and author mappings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::mapper::AuthorMapping;
use crate::errors::IdentityError;
use crate::models::{Contributor, SyntheticIdentity};

#[derive(Default)]
struct CacheState {
    /// Fingerprint of the configuration the entries were computed under.
    fingerprint: Option<String>,
    rankings: HashMap<String, Arc<Vec<Contributor>>>,
    /// Keyed by source id and the ordered identities, thresholds included.
    mappings: HashMap<(String, Vec<SyntheticIdentity>), Arc<AuthorMapping>>,
}

/// Shared cache of per-source rankings and mappings.
///
/// Cloning is cheap and every clone sees the same entries. Entries stay valid
/// until [`bind_config`](Self::bind_config) is called with a different
/// configuration fingerprint.
#[derive(Clone, Default)]
pub struct MappingCache {
    state: Arc<RwLock<CacheState>>,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate the cache with a configuration, dropping every entry if it
    /// was built under a different one.
    pub fn bind_config(&self, fingerprint: Option<&str>) -> Result<(), IdentityError> {
        let mut state = self.state.write().map_err(|_| IdentityError::CachePoisoned)?;
        if state.fingerprint.as_deref() != fingerprint {
            if state.fingerprint.is_some() {
                info!(
                    rankings = state.rankings.len(),
                    mappings = state.mappings.len(),
                    "configuration changed, clearing mapping cache"
                );
            }
            state.rankings.clear();
            state.mappings.clear();
            state.fingerprint = fingerprint.map(str::to_string);
        }
        Ok(())
    }

    /// Cached ranking for `source_id`, computing it with `rank` on a miss.
    ///
    /// `rank` runs without the lock held. If two callers race on the same
    /// source the first stored result wins, so every caller sees one ranking.
    pub fn ranking_or_insert<F>(
        &self,
        source_id: &str,
        rank: F,
    ) -> Result<Arc<Vec<Contributor>>, IdentityError>
    where
        F: FnOnce() -> Result<Vec<Contributor>, IdentityError>,
    {
        {
            let state = self.state.read().map_err(|_| IdentityError::CachePoisoned)?;
            if let Some(hit) = state.rankings.get(source_id) {
                debug!(source = source_id, "ranking cache hit");
                return Ok(Arc::clone(hit));
            }
        }
        let ranked = Arc::new(rank()?);
        let mut state = self.state.write().map_err(|_| IdentityError::CachePoisoned)?;
        Ok(Arc::clone(
            state
                .rankings
                .entry(source_id.to_string())
                .or_insert(ranked),
        ))
    }

    /// Cached mapping for `source_id` and `identities`, building it on a miss.
    pub fn mapping_or_insert<F>(
        &self,
        source_id: &str,
        identities: &[SyntheticIdentity],
        build: F,
    ) -> Result<Arc<AuthorMapping>, IdentityError>
    where
        F: FnOnce() -> AuthorMapping,
    {
        let key = (source_id.to_string(), identities.to_vec());
        {
            let state = self.state.read().map_err(|_| IdentityError::CachePoisoned)?;
            if let Some(hit) = state.mappings.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }
        let mapping = Arc::new(build());
        let mut state = self.state.write().map_err(|_| IdentityError::CachePoisoned)?;
        Ok(Arc::clone(state.mappings.entry(key).or_insert(mapping)))
    }

    /// Number of sources with a cached ranking.
    pub fn ranked_sources(&self) -> usize {
        self.state.read().map(|s| s.rankings.len()).unwrap_or(0)
    }
}
