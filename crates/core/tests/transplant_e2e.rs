//! End-to-end tests for source→target history transplantation.
//!
//! These tests exercise the real `TransplantEngine` with:
//! - Source repositories built with `git2` under a local "public" host
//!   directory (`source_base_url` points at it)
//! - Bare target repositories under a local "remotes" directory
//!   (`git_base_url` points at it) receiving the force-push
//! - A config file written to disk and loaded through `AppConfig`
//!
//! No network I/O: every clone and push uses local paths, and each target
//! pins `default_branch` so the hosting API is never called.

use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::{IndexEntry, IndexTime, Oid, Repository, Signature, Time};
use tempfile::TempDir;

use orgmimic_core::config::AppConfig;
use orgmimic_core::git::GitClient;
use orgmimic_core::models::{CommitRecord, ObjectId, PairStatus};
use orgmimic_core::{HistoryStore, MappingCache, TransplantEngine};

const DAY: i64 = 86_400;
const ORG: &str = "goat";

// ===========================================================================
// Helpers
// ===========================================================================

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join("public/pub")).unwrap();
        std::fs::create_dir_all(root.join(format!("remotes/{ORG}"))).unwrap();
        Self { _tmp: tmp, root }
    }

    /// Bare source repository `pub/<name>` with HEAD on `main`.
    fn source(&self, name: &str) -> Repository {
        let repo = Repository::init_bare(self.root.join(format!("public/pub/{name}.git"))).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        repo
    }

    /// Empty bare target repository `goat/<name>`.
    fn target(&self, name: &str) -> PathBuf {
        let path = self.root.join(format!("remotes/{ORG}/{name}.git"));
        Repository::init_bare(&path).unwrap();
        path
    }

    fn write_config(&self, body: &str) -> PathBuf {
        let path = self.root.join("orgmimic.toml");
        let header = format!(
            r#"
orgs = ["{ORG}"]

[run]
work_dir = '{work}'

[run.retry]
attempts = 1
backoff_secs = 0

[github]
source_base_url = '{public}'
git_base_url = '{remotes}'
"#,
            work = self.root.join("work").display(),
            public = self.root.join("public").display(),
            remotes = self.root.join("remotes").display(),
        );
        std::fs::write(&path, format!("{header}\n{body}")).unwrap();
        path
    }
}

fn days_ago(days: i64) -> i64 {
    Utc::now().timestamp() - days * DAY
}

/// Commit a tree holding exactly `files` and move `main` to it.
fn commit(
    repo: &Repository,
    parents: &[Oid],
    email: &str,
    time: i64,
    files: &[(&str, &str)],
    message: &str,
) -> Oid {
    let mut index = git2::Index::new().unwrap();
    for (path, contents) in files {
        let blob = repo.blob(contents.as_bytes()).unwrap();
        index
            .add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: contents.len() as u32,
                id: blob,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })
            .unwrap();
    }
    let tree = repo.find_tree(index.write_tree_to(repo).unwrap()).unwrap();
    let name = email.split('@').next().unwrap();
    let sig = Signature::new(name, email, &Time::new(time, 0)).unwrap();
    let parents: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<_> = parents.iter().collect();
    let oid = repo.commit(None, &sig, &sig, message, &tree, &parent_refs).unwrap();
    repo.reference("refs/heads/main", oid, true, "fixture").unwrap();
    oid
}

/// First-parent chain of `refs/heads/main` in `repo_path`, oldest first.
fn main_chain(repo_path: &Path) -> Vec<CommitRecord> {
    let client = GitClient::new(repo_path).unwrap();
    let mut next = Some(client.resolve("refs/heads/main").unwrap());
    let mut chain = Vec::new();
    while let Some(id) = next {
        let commit = client.read_commit(&id).unwrap();
        next = commit.parents.first().cloned();
        chain.push(commit);
    }
    chain.reverse();
    chain
}

fn member(login: &str, repo: &str, days: u32, commit_secret: bool) -> String {
    format!(
        r#"
[[members]]
login = "{login}"
email = "{login}@goat.test"

[[members.activity]]
repo = "{repo}"
days_since_last_commit = {days}
commit_secret = {commit_secret}
"#
    )
}

fn repo_entry(target: &str, source: &str) -> String {
    format!(
        r#"
[repos.{target}]
source_org = "pub"
source_repo = "{source}"
default_branch = "main"
"#
    )
}

/// Linear history: one outsider commit, then three old commits by `dev`,
/// then one recent commit by `dev`.
fn linear_source(fx: &Fixture, name: &str) -> Oid {
    let repo = fx.source(name);
    let r = commit(&repo, &[], "outsider@x.test", days_ago(500), &[("README", "r\n")], "root\n");
    let a = commit(&repo, &[r], "dev@x.test", days_ago(400), &[("README", "r\n"), ("a", "1\n")], "a\n");
    let b = commit(&repo, &[a], "dev@x.test", days_ago(300), &[("README", "r\n"), ("a", "2\n")], "b\n");
    let c = commit(&repo, &[b], "dev@x.test", days_ago(200), &[("README", "c\n"), ("a", "2\n")], "c\n");
    commit(&repo, &[c], "dev@x.test", days_ago(5), &[("README", "c\n"), ("a", "3\n")], "recent\n")
}

async fn run(config_path: &Path) -> orgmimic_core::models::RunReport {
    let config = AppConfig::load_and_resolve(config_path).unwrap();
    let engine = TransplantEngine::new(config).unwrap();
    engine.run_org(ORG, None).await.unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_unmapped_source_is_mirrored_exactly() {
    let fx = Fixture::new();
    let tip = linear_source(&fx, "lib");
    let target = fx.target("frontend");
    let config = fx.write_config(&repo_entry("frontend", "lib"));

    let report = run(&config).await;

    assert!(report.is_complete(), "report: {report:?}");
    match &report.pairs[0].status {
        PairStatus::Published { rewritten, tip: pushed, .. } => {
            assert!(!rewritten);
            assert_eq!(pushed, &tip.to_string());
        }
        other => panic!("unexpected status {other:?}"),
    }
    let remote = GitClient::new(&target).unwrap();
    assert_eq!(remote.resolve("refs/heads/main").unwrap(), ObjectId::from(tip));
}

#[tokio::test]
async fn test_eligible_commits_are_remapped_with_original_timestamps() {
    let fx = Fixture::new();
    let source_tip = linear_source(&fx, "lib");
    let target = fx.target("frontend");
    let body = format!(
        "{}{}",
        repo_entry("frontend", "lib"),
        member("alice", "frontend", 30, false)
    );
    let config = fx.write_config(&body);

    let report = run(&config).await;
    assert!(report.is_complete(), "report: {report:?}");
    let stats = &report.pairs[0].stats;
    assert_eq!(stats.walked, 5);
    assert_eq!(stats.eligible, 3);

    let source = main_chain(&fx.root.join("public/pub/lib.git"));
    let pushed = main_chain(&target);

    // No non-merge commit is dropped or duplicated.
    assert_eq!(pushed.len(), source.len());
    let messages: Vec<_> = pushed.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(messages, vec!["root\n", "a\n", "b\n", "c\n", "recent\n"]);

    // Root and seed are the source commits themselves.
    assert_eq!(pushed[0].id, source[0].id);
    assert_eq!(pushed[1].id, source[1].id);
    assert_eq!(pushed[1].author.email, "dev@x.test");

    // Descendants of the seed old enough for the threshold become alice.
    for (new, old) in pushed[2..4].iter().zip(&source[2..4]) {
        assert_eq!(new.author.email, "alice@goat.test");
        assert_eq!(new.author.name, "alice");
        assert_eq!(new.committer.email, "alice@goat.test");
        assert_eq!(new.author.time, old.author.time);
        assert_eq!(new.committer.time, old.committer.time);
        assert_eq!(new.tree, old.tree);
    }

    // Too recent for the threshold: original identity.
    assert_eq!(pushed[4].author.email, "dev@x.test");
    assert_eq!(pushed[4].tree, source[4].tree);
    assert_ne!(pushed[4].id, ObjectId::from(source_tip));
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let fx = Fixture::new();
    linear_source(&fx, "lib");
    let target = fx.target("frontend");
    let body = format!(
        "{}{}{}",
        repo_entry("frontend", "lib"),
        member("alice", "frontend", 30, false),
        member("bob", "frontend", 30, false)
    );
    let config_path = fx.write_config(&body);

    let config = AppConfig::load_and_resolve(&config_path).unwrap();
    let first_engine = TransplantEngine::new(config.clone()).unwrap();
    let first_mapping = first_engine.preview_mappings(None).await.unwrap();
    first_engine.run_org(ORG, None).await.unwrap();
    let first_chain: Vec<_> = main_chain(&target).into_iter().map(|c| c.message).collect();

    // A new engine with a fresh cache re-walks the source and must agree.
    let second_engine = TransplantEngine::new(config).unwrap();
    let second_mapping = second_engine.preview_mappings(None).await.unwrap();
    let report = second_engine.run_org(ORG, None).await.unwrap();
    assert!(report.is_complete(), "second run: {report:?}");
    let second_chain: Vec<_> = main_chain(&target).into_iter().map(|c| c.message).collect();

    assert_eq!(first_mapping[0].mapped, second_mapping[0].mapped);
    assert_eq!(first_chain, second_chain);
}

#[tokio::test]
async fn test_identity_without_contributor_gets_no_commits() {
    let fx = Fixture::new();
    linear_source(&fx, "lib");
    let target = fx.target("frontend");
    let body = format!(
        "{}{}{}",
        repo_entry("frontend", "lib"),
        member("alice", "frontend", 30, false),
        member("bob", "frontend", 30, false)
    );
    let config_path = fx.write_config(&body);
    let engine = TransplantEngine::new(AppConfig::load_and_resolve(&config_path).unwrap()).unwrap();

    let previews = engine.preview_mappings(Some("frontend")).await.unwrap();
    // outsider has one commit, dev four: dev -> alice, outsider -> bob.
    let logins: Vec<_> = previews[0]
        .mapped
        .iter()
        .map(|m| (m.source_email.as_str(), m.identity.login.as_str()))
        .collect();
    assert_eq!(logins, vec![("dev@x.test", "alice"), ("outsider@x.test", "bob")]);

    // A third identity with nobody left to map.
    let body = format!(
        "{}{}",
        body,
        member("carol", "frontend", 30, false)
    );
    let config_path = fx.write_config(&body);
    let report = run(&config_path).await;
    assert!(report.is_complete(), "report: {report:?}");
    assert!(main_chain(&target)
        .iter()
        .all(|c| c.author.email != "carol@goat.test"));
}

#[tokio::test]
async fn test_merge_history_is_reconciled() {
    let fx = Fixture::new();
    let repo = fx.source("lib");
    let r = commit(&repo, &[], "outsider@x.test", days_ago(500), &[("f", "r\n")], "R");
    let a = commit(&repo, &[r], "dev@x.test", days_ago(400), &[("f", "r\n"), ("a", "a\n")], "A");
    let x = commit(&repo, &[r], "side@x.test", days_ago(390), &[("f", "r\n"), ("x", "x\n")], "X");
    let b = commit(
        &repo,
        &[a, x],
        "outsider@x.test",
        days_ago(380),
        &[("f", "r\n"), ("a", "a\n"), ("x", "x\n")],
        "B",
    );
    let c = commit(
        &repo,
        &[b],
        "dev@x.test",
        days_ago(300),
        &[("f", "c\n"), ("a", "a\n"), ("x", "x\n")],
        "C",
    );
    let target = fx.target("frontend");
    let body = format!(
        "{}{}",
        repo_entry("frontend", "lib"),
        member("alice", "frontend", 30, false)
    );
    let report = run(&fx.write_config(&body)).await;
    assert!(report.is_complete(), "report: {report:?}");
    assert_eq!(report.pairs[0].stats.skipped_merges, 1);

    let pushed = main_chain(&target);
    let tip = pushed.last().unwrap();
    let source_c = GitClient::new(fx.root.join("public/pub/lib.git"))
        .unwrap()
        .read_commit(&c.into())
        .unwrap();
    assert_eq!(tip.message, "C");
    assert_eq!(tip.author.email, "alice@goat.test");
    assert_eq!(tip.author.time, source_c.author.time);
    assert_eq!(tip.tree, source_c.tree);
    // The pushed lineage is linear: no merge commit survives.
    assert!(pushed.iter().all(|c| c.parents.len() <= 1));
}

#[tokio::test]
async fn test_secret_is_planted_on_top() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let fx = Fixture::new();
    linear_source(&fx, "lib");
    let target = fx.target("frontend");
    let secrets_dir = fx.root.join("secrets");
    std::fs::create_dir_all(&secrets_dir).unwrap();
    let mut encoded = b"ghp_fakefakefake".to_vec();
    for _ in 0..3 {
        encoded = STANDARD.encode(&encoded).into_bytes();
    }
    std::fs::write(secrets_dir.join("token.encoded"), &encoded).unwrap();

    let body = format!(
        "[secrets]\ndir = '{}'\n{}{}",
        secrets_dir.display(),
        repo_entry("frontend", "lib"),
        member("alice", "frontend", 30, true)
    );
    let report = run(&fx.write_config(&body)).await;
    assert!(report.is_complete(), "report: {report:?}");
    assert_eq!(report.pairs[0].stats.secrets_planted, 1);

    let pushed = main_chain(&target);
    let tip = pushed.last().unwrap();
    assert_eq!(tip.author.email, "alice@goat.test");
    assert!(tip.author.time <= days_ago(31) + 60);
    assert_eq!(pushed[pushed.len() - 2].message, "recent\n");

    let repo = Repository::open_bare(&target).unwrap();
    let tree = repo
        .find_tree(Oid::from_str(tip.tree.as_str()).unwrap())
        .unwrap();
    let secret = tree
        .iter()
        .find(|e| e.name().is_some_and(|n| n.starts_with("secret_")))
        .unwrap();
    let blob = repo.find_blob(secret.id()).unwrap();
    assert_eq!(blob.content(), b"ghp_fakefakefake");
}

#[tokio::test]
async fn test_shared_source_and_independent_failures() {
    let fx = Fixture::new();
    linear_source(&fx, "lib");
    fx.target("frontend");
    // No bare repository for "backend": its push fails, frontend still lands.
    let body = format!(
        "{}{}{}",
        repo_entry("frontend", "lib"),
        repo_entry("backend", "lib"),
        member("alice", "frontend", 30, false)
    );
    let config = AppConfig::load_and_resolve(fx.write_config(&body)).unwrap();
    let cache = MappingCache::new();
    let engine = TransplantEngine::with_cache(config, cache.clone()).unwrap();

    let report = engine.run_org(ORG, None).await.unwrap();
    assert_eq!(report.pairs.len(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    let backend = report.pairs.iter().find(|p| p.target == "backend").unwrap();
    assert!(matches!(backend.status, PairStatus::Failed { .. }));

    // Both targets share one cached clone and one ranking.
    assert!(fx.root.join("work/public_repos/pub-lib").is_dir());
    assert_eq!(cache.ranked_sources(), 1);
}

#[tokio::test]
async fn test_targets_sharing_a_source_use_their_own_thresholds() {
    let fx = Fixture::new();
    linear_source(&fx, "lib");
    let frontend = fx.target("frontend");
    let backend = fx.target("backend");
    let config = fx.write_config(&format!(
        r#"{}{}
[[members]]
login = "alice"
email = "alice@goat.test"

[[members.activity]]
repo = "frontend"
days_since_last_commit = 100

[[members.activity]]
repo = "backend"
days_since_last_commit = 350
"#,
        repo_entry("frontend", "lib"),
        repo_entry("backend", "lib"),
    ));

    let report = run(&config).await;
    assert!(report.is_complete(), "report: {report:?}");

    let authors = |path: &Path| -> Vec<String> {
        main_chain(path).into_iter().map(|c| c.author.email).collect()
    };
    // Threshold 100 days: b and c (300 and 200 days old) move to alice.
    assert_eq!(
        authors(frontend.as_path()),
        vec!["outsider@x.test", "dev@x.test", "alice@goat.test", "alice@goat.test", "dev@x.test"]
    );
    // Threshold 350 days: only the seed is old enough, so nothing is remapped.
    assert_eq!(
        authors(backend.as_path()),
        vec!["outsider@x.test", "dev@x.test", "dev@x.test", "dev@x.test", "dev@x.test"]
    );
}
