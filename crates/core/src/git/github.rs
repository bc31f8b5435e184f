//! GitHub REST API client.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::GitHubError;

/// The subset of `GET /repos/{owner}/{repo}` orgmimic reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("orgmimic/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, authenticated = token.is_some(), "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Fetch repository metadata. `repo` is `owner/name`.
    #[instrument(skip(self))]
    pub async fn get_repository(&self, repo: &str) -> Result<GitHubRepository, GitHubError> {
        let url = format!("{}/repos/{}", self.api_url, repo);
        let resp = self.get(&url).send().await?;
        self.check_response(&resp)?;
        let repository: GitHubRepository = resp
            .json()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        debug!(default_branch = %repository.default_branch, "fetched repository");
        Ok(repository)
    }

    /// Name of the repository's default branch.
    pub async fn get_default_branch(&self, repo: &str) -> Result<String, GitHubError> {
        Ok(self.get_repository(repo).await?.default_branch)
    }

    /// Check whether a repository exists.
    #[instrument(skip(self))]
    pub async fn repo_exists(&self, repo: &str) -> Result<bool, GitHubError> {
        let url = format!("{}/repos/{}", self.api_url, repo);
        let resp = self.get(&url).send().await?;
        Ok(resp.status().is_success())
    }

    fn check_response(&self, resp: &reqwest::Response) -> Result<(), GitHubError> {
        let reset = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok());
        let remaining = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok());
        classify_status(resp.status().as_u16(), remaining, reset)
    }
}

/// Map an HTTP status (plus rate-limit headers) to success or a typed error.
///
/// GitHub reports an exhausted primary rate limit as 403 with
/// `x-ratelimit-remaining: 0`, secondary limits as 429.
fn classify_status(
    status: u16,
    ratelimit_remaining: Option<&str>,
    ratelimit_reset: Option<&str>,
) -> Result<(), GitHubError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let reset_at = || ratelimit_reset.unwrap_or("unknown").to_string();
    if status == 429 || (status == 403 && ratelimit_remaining == Some("0")) {
        return Err(GitHubError::RateLimited {
            reset_at: reset_at(),
        });
    }
    if status == 401 || status == 403 {
        return Err(GitHubError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    Err(GitHubError::ApiError {
        status,
        body: format!("HTTP {}", status),
    })
}
