//! TOML-based configuration system for orgmimic.
//!
//! Sensitive values (API tokens) are stored as `_env` fields that reference
//! environment variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::SyntheticIdentity;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Organizations to provision.
    #[serde(default)]
    pub orgs: Vec<String>,

    /// Run-wide engine settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Hosting API and remote settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Fake secret pool settings.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Target repository name -> public source repository.
    #[serde(default)]
    pub repos: BTreeMap<String, SourceRepoConfig>,

    /// Synthetic members, in declaration order.
    #[serde(default)]
    pub members: Vec<MemberConfig>,

    /// Fingerprint of the file this config was loaded from (not serialized).
    #[serde(skip)]
    pub fingerprint: Option<String>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Engine settings shared by every source→target pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root for `public_repos/` (source cache) and `local_repos/` (pair clones).
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How many top contributors to rank per source repository.
    #[serde(default = "default_max_contributors")]
    pub max_contributors: usize,

    /// Commits older than this many days are ignored by the ranking.
    #[serde(default = "default_observation_window_days")]
    pub observation_window_days: u32,

    /// Name of the local branch that carries the rewritten lineage.
    #[serde(default = "default_amended_branch")]
    pub amended_branch: String,

    /// Regular expressions matched against author emails; matches are bots.
    #[serde(default = "default_bot_patterns")]
    pub bot_patterns: Vec<String>,

    /// Source→target pairs processed concurrently (1 = sequential).
    #[serde(default = "default_parallel_pairs")]
    pub parallel_pairs: usize,

    /// Retry policy for clone / fetch / push.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./orgmimic-data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_max_contributors() -> usize {
    10
}
fn default_observation_window_days() -> u32 {
    1800
}
fn default_amended_branch() -> String {
    "amended".into()
}
fn default_bot_patterns() -> Vec<String> {
    vec![r"(?i)\[bot\]".into()]
}
fn default_parallel_pairs() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            max_contributors: default_max_contributors(),
            observation_window_days: default_observation_window_days(),
            amended_branch: default_amended_branch(),
            bot_patterns: default_bot_patterns(),
            parallel_pairs: default_parallel_pairs(),
            retry: RetryConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn public_repos_dir(&self) -> PathBuf {
        self.work_dir.join("public_repos")
    }

    pub fn local_repos_dir(&self) -> PathBuf {
        self.work_dir.join("local_repos")
    }
}

/// Bounded fixed-backoff retry for transient network failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_secs() -> u64 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_secs: default_retry_backoff_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// Hosting API and remote URL configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Explicit base URL for pushing to target repositories. Derived from
    /// `api_url` when unset.
    #[serde(default)]
    pub git_base_url: Option<String>,

    /// Base URL public source repositories are cloned from.
    #[serde(default = "default_source_base_url")]
    pub source_base_url: String,

    /// Environment variable holding the personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_source_base_url() -> String {
    "https://github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            git_base_url: None,
            source_base_url: default_source_base_url(),
            token_env: default_token_env(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Location of the fake secret pool used by secret planting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Directory holding `*.encoded` files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Repositories and members
// ---------------------------------------------------------------------------

/// The public repository a target repository mimics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRepoConfig {
    pub source_org: String,
    pub source_repo: String,

    /// Target default branch. When unset it is looked up via the API.
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl SourceRepoConfig {
    /// `org/repo` identifier used as the mapping cache key.
    pub fn source_id(&self) -> String {
        format!("{}/{}", self.source_org, self.source_repo)
    }

    /// Directory name of the cached clone under `public_repos/`.
    pub fn cache_dir_name(&self) -> String {
        format!("{}-{}", self.source_org, self.source_repo)
    }
}

/// A synthetic organization member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub login: String,
    pub email: String,

    /// Per-repository activity settings.
    #[serde(default)]
    pub activity: Vec<ActivityConfig>,
}

/// How active a member looks in one target repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Target repository name.
    pub repo: String,

    /// Recency threshold for rewritten history.
    #[serde(default)]
    pub days_since_last_commit: Option<u32>,

    /// Plant a fake secret commit under this member.
    #[serde(default)]
    pub commit_secret: bool,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.fingerprint = Some(fingerprint(path, &contents));

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the API token from its environment variable.
    ///
    /// A missing token logs a warning but does not fail: public sources can
    /// still be ranked and mapped without one.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orgs.is_empty() {
            return Err(invalid("orgs", "at least one organization is required"));
        }
        if self.repos.is_empty() {
            return Err(invalid("repos", "at least one repository mapping is required"));
        }
        for (name, repo) in &self.repos {
            if repo.source_org.trim().is_empty() || repo.source_repo.trim().is_empty() {
                return Err(invalid(
                    &format!("repos.{}", name),
                    "source_org and source_repo must not be empty",
                ));
            }
        }
        if self.run.max_contributors == 0 {
            return Err(invalid("run.max_contributors", "must be > 0"));
        }
        if self.run.parallel_pairs == 0 {
            return Err(invalid("run.parallel_pairs", "must be > 0"));
        }
        if self.run.retry.attempts == 0 {
            return Err(invalid("run.retry.attempts", "must be > 0"));
        }
        if self.run.amended_branch.trim().is_empty()
            || !matches!(git2::Branch::name_is_valid(&self.run.amended_branch), Ok(true))
        {
            return Err(invalid("run.amended_branch", "not a valid branch name"));
        }
        for pattern in &self.run.bot_patterns {
            if let Err(e) = regex_lite::Regex::new(pattern) {
                return Err(invalid("run.bot_patterns", &e.to_string()));
            }
        }

        let mut emails = HashSet::new();
        for member in &self.members {
            if member.login.trim().is_empty() || member.email.trim().is_empty() {
                return Err(invalid("members", "login and email must not be empty"));
            }
            if !emails.insert(member.email.to_ascii_lowercase()) {
                return Err(invalid(
                    "members",
                    &format!("duplicate member email '{}'", member.email),
                ));
            }
            for activity in &member.activity {
                if !self.repos.contains_key(&activity.repo) {
                    return Err(invalid(
                        &format!("members.{}.activity", member.login),
                        &format!("unknown repository '{}'", activity.repo),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Source repository for a target repository.
    pub fn source_for(&self, target: &str) -> Option<&SourceRepoConfig> {
        self.repos.get(target)
    }

    /// Ordered synthetic identities for a target repository: every member
    /// with an activity entry for it, in member declaration order.
    pub fn identities_for(&self, target: &str) -> Vec<SyntheticIdentity> {
        self.members
            .iter()
            .filter_map(|member| {
                member
                    .activity
                    .iter()
                    .find(|a| a.repo == target)
                    .map(|activity| SyntheticIdentity {
                        login: member.login.clone(),
                        email: member.email.clone(),
                        recency_threshold_days: activity.days_since_last_commit,
                        commit_secret: activity.commit_secret,
                    })
            })
            .collect()
    }

    /// A commented template config suitable for `orgmimic init`.
    pub fn default_template() -> &'static str {
        r#"# orgmimic configuration
orgs = ["goat-org"]

[run]
work_dir = "./orgmimic-data"
log_level = "info"
max_contributors = 10
observation_window_days = 1800
amended_branch = "amended"
parallel_pairs = 1

[run.retry]
attempts = 3
backoff_secs = 5

[github]
api_url = "https://api.github.com"
source_base_url = "https://github.com"
token_env = "GITHUB_TOKEN"

[secrets]
# dir = "./secrets"

[repos.frontend]
source_org = "pallets"
source_repo = "flask"

[[members]]
login = "alice-goat"
email = "alice@goat.example"

[[members.activity]]
repo = "frontend"
days_since_last_commit = 30
commit_secret = false
"#
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        detail: detail.to_string(),
    }
}

/// SHA-256 over the config path and contents; changes whenever either does.
fn fingerprint(path: &Path, contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(contents.as_bytes());
    hex::encode(hasher.finalize())
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
