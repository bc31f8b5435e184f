//! Contributor ranking over a source repository's history.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use regex_lite::Regex;
use tracing::{debug, info, instrument};

use crate::config::RunConfig;
use crate::errors::IdentityError;
use crate::git::{HistoryStore, WalkOrder};
use crate::models::{Contributor, ObjectId};

/// Ranks the most active human contributors of a repository.
///
/// The walk is newest-first and stops at the first commit older than the
/// observation window. Merge commits and bot authors are not counted. Ties
/// keep the order in which authors were first seen, i.e. the author with the
/// more recent commit ranks higher.
#[derive(Debug, Clone)]
pub struct ContributorRanker {
    max_contributors: usize,
    window_days: u32,
    bot_patterns: Vec<Regex>,
}

impl ContributorRanker {
    pub fn new(
        max_contributors: usize,
        window_days: u32,
        bot_patterns: &[String],
    ) -> Result<Self, IdentityError> {
        let bot_patterns = bot_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| IdentityError::InvalidBotPattern {
                    pattern: p.clone(),
                    detail: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            max_contributors,
            window_days,
            bot_patterns,
        })
    }

    pub fn from_config(run: &RunConfig) -> Result<Self, IdentityError> {
        Self::new(
            run.max_contributors,
            run.observation_window_days,
            &run.bot_patterns,
        )
    }

    pub fn is_bot(&self, email: &str) -> bool {
        self.bot_patterns.iter().any(|re| re.is_match(email))
    }

    /// Up to `max_contributors` contributors, most commits first.
    #[instrument(skip(self, store), fields(tip = %tip.short()))]
    pub fn rank<S: HistoryStore + ?Sized>(
        &self,
        store: &S,
        tip: &ObjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contributor>, IdentityError> {
        let cutoff = (now - Duration::days(i64::from(self.window_days))).timestamp();

        // email -> (count, first-seen position)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut walked = 0usize;
        for commit in store.walk(tip, WalkOrder::NewestFirst)? {
            let commit = commit?;
            if commit.commit_time() < cutoff {
                debug!(sha = %commit.id.short(), "reached end of observation window");
                break;
            }
            walked += 1;
            if commit.is_merge() {
                continue;
            }
            let Some(email) = commit.author_email() else {
                continue;
            };
            let email = email.to_ascii_lowercase();
            if self.is_bot(&email) {
                continue;
            }
            let position = counts.len();
            counts.entry(email).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(email, (count, seen))| (email, count, seen))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.truncate(self.max_contributors);

        info!(
            walked,
            contributors = ranked.len(),
            "ranked source contributors"
        );
        Ok(ranked
            .into_iter()
            .map(|(email, commit_count, _)| Contributor {
                email,
                commit_count,
            })
            .collect())
    }
}
