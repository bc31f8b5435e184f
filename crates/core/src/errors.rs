//! Error types for the orgmimic core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Transplant(#[from] TransplantError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A branch that must be freshly created already exists.
    #[error("git branch '{0}' already exists")]
    BranchExists(String),

    /// Push was rejected by the remote.
    #[error("git push rejected for '{refspec}': {detail}")]
    PushRejected {
        refspec: String,
        detail: String,
    },

    /// A string could not be parsed as an object id.
    #[error("invalid git object id '{0}'")]
    InvalidObjectId(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Whether this error came from the network layer (clone/fetch/push
    /// transport) and is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git2Error(e) => matches!(
                e.class(),
                git2::ErrorClass::Net
                    | git2::ErrorClass::Http
                    | git2::ErrorClass::Ssh
                    | git2::ErrorClass::Ssl
                    | git2::ErrorClass::Os
            ),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError {
        status: u16,
        body: String,
    },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited {
        reset_at: String,
    },

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors from contributor ranking and identity mapping.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The target repository has no entry in the configuration.
    #[error("target repository '{0}' is not configured")]
    UnknownTarget(String),

    /// A lock around the mapping cache was poisoned by a panicking thread.
    #[error("mapping cache lock poisoned")]
    CachePoisoned,

    /// A bot-detection pattern failed to compile.
    #[error("invalid bot pattern '{pattern}': {detail}")]
    InvalidBotPattern {
        pattern: String,
        detail: String,
    },

    /// Walking the source history failed.
    #[error("identity git error: {0}")]
    Git(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Secret pool errors
// ---------------------------------------------------------------------------

/// Errors from loading the fake secret pool.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The pool directory or a file in it could not be read.
    #[error("secret pool I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A `.encoded` file did not decode to UTF-8 text.
    #[error("secret file '{file}' could not be decoded: {detail}")]
    Decode {
        file: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Transplant errors
// ---------------------------------------------------------------------------

/// Errors that abort the transplantation of a single source→target pair.
///
/// None of these abort the overall run; the engine records them in the
/// pair's outcome and moves on.
#[derive(Debug, Error)]
pub enum TransplantError {
    /// The amended branch could not be created because it already exists.
    #[error("amended branch '{branch}' already exists in '{repo}'; concurrent or repeated run?")]
    BranchCollision {
        branch: String,
        repo: String,
    },

    /// A rewrite-eligible commit's author has no synthetic identity.
    #[error("no synthetic identity mapped for source author '{0}'")]
    MissingMapping(String),

    /// Underlying Git error.
    #[error("transplant git error: {0}")]
    Git(#[from] GitError),

    /// Underlying GitHub error.
    #[error("transplant GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    /// Identity ranking or mapping failed.
    #[error("transplant identity error: {0}")]
    Identity(#[from] IdentityError),

    /// A blocking task panicked or was cancelled.
    #[error("transplant task failed: {0}")]
    Task(String),
}

impl TransplantError {
    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git(e) => e.is_transient(),
            Self::GitHub(GitHubError::HttpError(_)) => true,
            Self::GitHub(GitHubError::RateLimited { .. }) => true,
            Self::Identity(IdentityError::Git(e)) => e.is_transient(),
            _ => false,
        }
    }
}
