//! Clone and push URL construction.
//!
//! Source repositories are cloned from `{source_base_url}/{org}/{repo}.git`.
//! Target repositories are pushed to `{git_base}/{org}/{repo}.git`, where the
//! git base is derived from the API URL unless configured explicitly, so a
//! GitHub Enterprise API URL (`https://<host>/api/v3`) pushes to
//! `https://<host>`.
//!
//! Either base may also be a local directory or `file://` URL, which is how
//! the integration tests stand in for a hosting service.

use crate::config::GitHubConfig;

/// Clone URL of a public source repository.
pub fn source_repo_url(source_base_url: &str, org: &str, repo: &str) -> String {
    join_repo(source_base_url, org, repo)
}

/// Push URL of a target repository in `org`.
pub fn target_repo_url(github: &GitHubConfig, org: &str, repo: &str) -> String {
    let base = git_base_url(&github.api_url, github.git_base_url.as_deref());
    join_repo(&base, org, repo)
}

/// Git host base for pushes.
///
/// 1. A non-blank `explicit` base wins.
/// 2. `https://api.github.com` maps to `https://github.com`.
/// 3. A trailing `/api/v3` is stripped.
/// 4. Anything else is used as-is.
pub fn git_base_url(api_url: &str, explicit: Option<&str>) -> String {
    if let Some(explicit) = explicit {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.trim_end_matches('/').to_string();
        }
    }

    let url = api_url.trim().trim_end_matches('/');
    if url.eq_ignore_ascii_case("https://api.github.com") {
        return "https://github.com".to_string();
    }
    if let Some(host) = url.strip_suffix("/api/v3") {
        return host.to_string();
    }
    url.to_string()
}

fn join_repo(base: &str, org: &str, repo: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    format!("{}/{}/{}.git", base, org, repo)
}
