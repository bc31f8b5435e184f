//! Per-organization orchestration of source→target history transplants.
//!
//! A run has two phases. Every distinct source repository is first brought up
//! to date in its bare cache under `public_repos/`, one at a time. Then each
//! configured target repository is transplanted as an independent unit of
//! failure: a fresh local clone of the cached source is walked and rewritten,
//! optionally topped with a planted secret, and force-pushed to the target's
//! default branch. Pairs run concurrently up to `run.parallel_pairs`; all git
//! work for one pair happens inside a single blocking task so the walk is
//! never suspended part-way.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AppConfig, SourceRepoConfig};
use crate::errors::{CoreError, GitError, IdentityError, TransplantError};
use crate::git::remote_url::{source_repo_url, target_repo_url};
use crate::git::{GitClient, GitHubClient};
use crate::history::{BranchPublisher, HistoryWalker};
use crate::identity::{ContributorRanker, IdentityMapper, MappedAuthor, MappingCache};
use crate::models::{PairOutcome, PairStatus, RewriteStats, RunReport};
use crate::retry::RetryPolicy;
use crate::secrets::{SecretPlanter, SecretPool};

/// Default branch assumed when the hosting API cannot tell us.
const FALLBACK_BRANCH: &str = "main";

/// Contributor mapping for one target repository, as shown by `orgmimic map`.
#[derive(Debug, Clone, Serialize)]
pub struct MappingPreview {
    pub target: String,
    pub source: String,
    pub mapped: Vec<MappedAuthor>,
    /// Logins of identities left without a source contributor.
    pub unmatched: Vec<String>,
}

/// Drives transplant runs for the organizations in an [`AppConfig`].
#[derive(Clone)]
pub struct TransplantEngine {
    config: Arc<AppConfig>,
    mapper: IdentityMapper,
    github: GitHubClient,
    retry: RetryPolicy,
    secrets: Arc<SecretPool>,
}

impl TransplantEngine {
    /// Create an engine with a fresh mapping cache.
    pub fn new(config: AppConfig) -> Result<Self, CoreError> {
        Self::with_cache(config, MappingCache::new())
    }

    /// Create an engine sharing `cache` with earlier engines. Entries computed
    /// under a different configuration are discarded.
    pub fn with_cache(config: AppConfig, cache: MappingCache) -> Result<Self, CoreError> {
        cache.bind_config(config.fingerprint.as_deref())?;
        let ranker = ContributorRanker::from_config(&config.run)?;
        let github = GitHubClient::new(config.github.api_url.clone(), config.github.token.clone())?;
        let retry = RetryPolicy::from_config(&config.run.retry);
        let secrets = match &config.secrets.dir {
            Some(dir) if dir.is_dir() => SecretPool::load(dir)?,
            Some(dir) => {
                warn!(dir = %dir.display(), "secret pool directory not found");
                SecretPool::default()
            }
            None => SecretPool::default(),
        };

        Ok(Self {
            config: Arc::new(config),
            mapper: IdentityMapper::new(ranker, cache),
            github,
            retry,
            secrets: Arc::new(secrets),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &MappingCache {
        self.mapper.cache()
    }

    /// Transplant every configured organization in turn.
    pub async fn run_all(&self) -> Result<Vec<RunReport>, CoreError> {
        let mut reports = Vec::with_capacity(self.config.orgs.len());
        for org in &self.config.orgs {
            reports.push(self.run_org(org, None).await?);
        }
        Ok(reports)
    }

    /// Transplant the configured target repositories (or just `only`) into
    /// `org`. Per-pair failures are recorded in the report, not returned.
    #[instrument(skip(self))]
    pub async fn run_org(&self, org: &str, only: Option<&str>) -> Result<RunReport, CoreError> {
        let started_at = Utc::now();
        let targets = self.select_targets(only)?;
        info!(org, pairs = targets.len(), "starting transplant run");

        let sources = self.prepare_sources(&targets).await;

        let permits = Arc::new(Semaphore::new(self.config.run.parallel_pairs.max(1)));
        let mut tasks = JoinSet::new();
        for (target, source) in targets {
            let engine = self.clone();
            let org = org.to_string();
            let cache_dir = sources.get(&source.source_id()).cloned();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                engine
                    .transplant_pair(&org, &target, &source, cache_dir, started_at)
                    .await
            });
        }

        let mut pairs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => pairs.push(outcome),
                Err(e) => error!(error = %e, "transplant task failed to join"),
            }
        }
        pairs.sort_by(|a, b| a.target.cmp(&b.target));

        let report = RunReport {
            org: org.to_string(),
            started_at,
            completed_at: Some(Utc::now()),
            pairs,
        };
        info!(
            org,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "transplant run complete"
        );
        Ok(report)
    }

    /// Rank and map contributors without rewriting or pushing anything.
    pub async fn preview_mappings(
        &self,
        only: Option<&str>,
    ) -> Result<Vec<MappingPreview>, CoreError> {
        let targets = self.select_targets(only)?;
        let sources = self.prepare_sources(&targets).await;
        let now = Utc::now();

        let mut previews = Vec::with_capacity(targets.len());
        for (target, source) in targets {
            let source_id = source.source_id();
            let cache_dir = match sources.get(&source_id).cloned() {
                Some(Ok(dir)) => dir,
                Some(Err(detail)) => {
                    warn!(target = %target, source = %source_id, error = %detail, "source unavailable");
                    continue;
                }
                None => continue,
            };
            let mapper = self.mapper.clone();
            let identities = self.config.identities_for(&target);
            let preview = tokio::task::spawn_blocking(move || {
                let client = GitClient::new(&cache_dir)?;
                let tip = client.head()?;
                let mapping = mapper.mapping_for(&client, &tip, &source_id, &identities, now)?;
                let mapped: Vec<MappedAuthor> = mapping.iter().cloned().collect();
                let unmatched = identities
                    .iter()
                    .skip(mapped.len())
                    .map(|i| i.login.clone())
                    .collect();
                Ok::<_, TransplantError>(MappingPreview {
                    target,
                    source: source_id,
                    mapped,
                    unmatched,
                })
            })
            .await
            .map_err(|e| TransplantError::Task(e.to_string()))??;
            previews.push(preview);
        }
        Ok(previews)
    }

    fn select_targets(
        &self,
        only: Option<&str>,
    ) -> Result<Vec<(String, SourceRepoConfig)>, IdentityError> {
        match only {
            Some(target) => {
                let source = self
                    .config
                    .source_for(target)
                    .ok_or_else(|| IdentityError::UnknownTarget(target.to_string()))?;
                Ok(vec![(target.to_string(), source.clone())])
            }
            None => Ok(self
                .config
                .repos
                .iter()
                .map(|(t, s)| (t.clone(), s.clone()))
                .collect()),
        }
    }

    /// Clone or refresh each distinct source once. Failures are kept per
    /// source so that only the pairs depending on them fail.
    async fn prepare_sources(
        &self,
        targets: &[(String, SourceRepoConfig)],
    ) -> HashMap<String, Result<PathBuf, String>> {
        let distinct: BTreeMap<String, SourceRepoConfig> = targets
            .iter()
            .map(|(_, s)| (s.source_id(), s.clone()))
            .collect();

        let mut prepared = HashMap::new();
        for (source_id, source) in distinct {
            let config = Arc::clone(&self.config);
            let retry = self.retry;
            let result = tokio::task::spawn_blocking(move || update_source_cache(&config, &source, retry))
                .await
                .map_err(|e| TransplantError::Task(e.to_string()))
                .and_then(|r| r);
            let entry = match result {
                Ok(dir) => Ok(dir),
                Err(e) => {
                    warn!(source = %source_id, error = %e, "unable to prepare source repository");
                    Err(e.to_string())
                }
            };
            prepared.insert(source_id, entry);
        }
        prepared
    }

    async fn default_branch(&self, org: &str, target: &str, source: &SourceRepoConfig) -> String {
        if let Some(branch) = &source.default_branch {
            return branch.clone();
        }
        let full_name = format!("{}/{}", org, target);
        let github = &self.github;
        let repo = full_name.as_str();
        match self
            .retry
            .run_async("default branch lookup", move || github.get_default_branch(repo))
            .await
        {
            Ok(branch) => branch,
            Err(e) => {
                warn!(repo = %full_name, error = %e, fallback = FALLBACK_BRANCH, "default branch lookup failed");
                FALLBACK_BRANCH.to_string()
            }
        }
    }

    async fn transplant_pair(
        &self,
        org: &str,
        target: &str,
        source: &SourceRepoConfig,
        cache_dir: Option<Result<PathBuf, String>>,
        now: DateTime<Utc>,
    ) -> PairOutcome {
        let source_id = source.source_id();
        let outcome = |status, stats| PairOutcome {
            target: target.to_string(),
            source: source_id.clone(),
            status,
            stats,
        };

        let cache_dir = match cache_dir {
            Some(Ok(dir)) => dir,
            Some(Err(error)) => return outcome(PairStatus::Failed { error }, RewriteStats::default()),
            None => {
                return outcome(
                    PairStatus::Skipped {
                        reason: "source was not prepared".into(),
                    },
                    RewriteStats::default(),
                )
            }
        };

        let branch = self.default_branch(org, target, source).await;
        let engine = self.clone();
        let job = PairJob {
            org: org.to_string(),
            target: target.to_string(),
            source_id: source_id.clone(),
            cache_dir,
            branch,
            now,
        };
        let result = tokio::task::spawn_blocking(move || engine.run_pair_blocking(job))
            .await
            .map_err(|e| TransplantError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok((status, stats)) => outcome(status, stats),
            Err(e) => {
                warn!(target, source = %source_id, error = %e, "transplant failed");
                outcome(
                    PairStatus::Failed {
                        error: e.to_string(),
                    },
                    RewriteStats::default(),
                )
            }
        }
    }

    /// Everything git-side for one pair, start to finish, on one thread.
    fn run_pair_blocking(&self, job: PairJob) -> Result<(PairStatus, RewriteStats), TransplantError> {
        let PairJob {
            org,
            target,
            source_id,
            cache_dir,
            branch,
            now,
        } = job;
        let config = &self.config;

        let local = config.run.local_repos_dir().join(&target);
        let client = fresh_local_clone(&cache_dir, &local)?.with_token(config.github.token.clone());
        let source_tip = client.head()?;

        let identities = config.identities_for(&target);
        let mapping = self
            .mapper
            .mapping_for(&client, &source_tip, &source_id, &identities, now)?;

        let walk = HistoryWalker::new(&client, &mapping, &config.run.amended_branch, &target, now)
            .run(&source_tip)?;
        let mut stats = walk.stats;
        let mut tip = walk.tip;

        for identity in identities.iter().filter(|i| i.commit_secret) {
            match self.secrets.next_secret() {
                Some(secret) => {
                    tip = SecretPlanter::new(&client).plant(&tip, identity, secret, now)?;
                    stats.secrets_planted += 1;
                }
                None => {
                    warn!(target = %target, login = %identity.login, "secret pool is empty, skipping secret commit");
                }
            }
        }

        let url = target_repo_url(&config.github, &org, &target);
        BranchPublisher::new(&client, self.retry).publish(&tip.id, &url, &branch)?;

        Ok((
            PairStatus::Published {
                branch,
                tip: tip.id.to_string(),
                rewritten: walk.rewritten,
            },
            stats,
        ))
    }
}

struct PairJob {
    org: String,
    target: String,
    source_id: String,
    cache_dir: PathBuf,
    branch: String,
    now: DateTime<Utc>,
}

/// Clone `public_repos/<org>-<repo>` if absent, otherwise fetch into it.
fn update_source_cache(
    config: &AppConfig,
    source: &SourceRepoConfig,
    retry: RetryPolicy,
) -> Result<PathBuf, TransplantError> {
    let dir = config.run.public_repos_dir().join(source.cache_dir_name());
    let url = source_repo_url(
        &config.github.source_base_url,
        &source.source_org,
        &source.source_repo,
    );

    if dir.exists() {
        debug!(path = %dir.display(), "source cache present, fetching");
        retry.run("fetch source", || GitClient::new(&dir)?.fetch_branches())?;
    } else {
        std::fs::create_dir_all(config.run.public_repos_dir()).map_err(GitError::from)?;
        retry.run("clone source", || {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            GitClient::clone_repo(&url, &dir, None, true).map(|_| ())
        })?;
    }
    Ok(dir)
}

/// Bare clone of the cached source at `local`, replacing any previous one.
fn fresh_local_clone(cache_dir: &Path, local: &Path) -> Result<GitClient, GitError> {
    if local.exists() {
        std::fs::remove_dir_all(local)?;
    }
    if let Some(parent) = local.parent() {
        std::fs::create_dir_all(parent)?;
    }
    GitClient::clone_repo(&cache_dir.to_string_lossy(), local, None, true)
}
