//! Shared test utilities: an in-process GitHub fake and commit histories.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use crate::github::{CommitPage, FetchedCommit, GitHubApiError, RemoteApi};
use crate::types::{RepoName, RepositoryMetadata, Sha};

pub const FAKE_API_BASE: &str = "https://api.github.test";

/// `n` commits, newest first: `c0000` dated 2024-03-01T00:00Z, each older one an
/// hour earlier. Authors rotate through three names.
pub fn fake_history(n: usize) -> Vec<FetchedCommit> {
    let head = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let authors = ["Ada", "Grace", "Linus"];
    (0..n)
        .map(|i| {
            let author = authors[i % authors.len()];
            FetchedCommit {
                hash: Sha::new(format!("c{i:04}")),
                message: format!("change {i}"),
                author: author.to_string(),
                author_email: format!("{}@example.com", author.to_lowercase()),
                date: head - chrono::Duration::hours(i as i64),
                url: format!("https://github.test/commit/c{i:04}"),
            }
        })
        .collect()
}

pub fn fake_metadata(name: &RepoName) -> RepositoryMetadata {
    RepositoryMetadata {
        name: name.name().to_string(),
        description: format!("{name} test fixture"),
        url: format!("https://github.test/{name}"),
        language: "Rust".to_string(),
        forks_count: 3,
        stars_count: 42,
        open_issues_count: 1,
        watchers_count: 42,
        created_at: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        updated_at: None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Injected {
    RateLimited(Option<Duration>),
    Status(u16),
}

#[derive(Default)]
struct FakeState {
    histories: HashMap<String, Vec<FetchedCommit>>,
    metadata_failures: HashMap<String, u16>,
    injected: HashMap<usize, Injected>,
    requests: Vec<String>,
}

/// An in-process stand-in for the GitHub REST API.
///
/// Commit listings honour `per_page`, `page`, `since`, `until` and `sha` the way
/// GitHub does, and paginate with absolute `next` URLs. Failures can be injected
/// by request index (0-based, counting every commit page request).
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository with the given history (newest first).
    pub fn set_history(&self, full_name: &str, commits: Vec<FetchedCommit>) {
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(full_name.to_string(), commits);
    }

    /// Prepends new commits to a repository's history.
    pub fn push_commits(&self, full_name: &str, newer: Vec<FetchedCommit>) {
        let mut state = self.state.lock().unwrap();
        let history = state.histories.entry(full_name.to_string()).or_default();
        let mut combined = newer;
        combined.append(history);
        *history = combined;
    }

    pub fn fail_metadata(&self, full_name: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .metadata_failures
            .insert(full_name.to_string(), status);
    }

    pub fn rate_limit_request(&self, index: usize, wait: Option<Duration>) {
        self.state
            .lock()
            .unwrap()
            .injected
            .insert(index, Injected::RateLimited(wait));
    }

    pub fn fail_request(&self, index: usize, status: u16) {
        self.state
            .lock()
            .unwrap()
            .injected
            .insert(index, Injected::Status(status));
    }

    /// URLs of every commit page request so far.
    pub fn requested_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Blocks commit page requests until permits are added to the returned semaphore.
    pub fn hold_requests(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn list(&self, url: &str) -> Result<CommitPage, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        let index = state.requests.len();
        state.requests.push(url.to_string());

        match state.injected.get(&index) {
            Some(Injected::RateLimited(wait)) => {
                return Err(GitHubApiError::rate_limited(429, *wait));
            }
            Some(Injected::Status(status)) => {
                return Err(GitHubApiError::from_status(*status, "injected failure"));
            }
            None => {}
        }

        let (path, query) = url
            .strip_prefix(FAKE_API_BASE)
            .and_then(|rest| rest.split_once('?'))
            .ok_or_else(|| GitHubApiError::not_found(format!("unexpected url {url}")))?;
        let full_name = path
            .strip_prefix("/repos/")
            .and_then(|p| p.strip_suffix("/commits"))
            .ok_or_else(|| GitHubApiError::not_found(format!("unexpected path {path}")))?;
        let params: HashMap<&str, &str> =
            query.split('&').filter_map(|kv| kv.split_once('=')).collect();

        let history = state
            .histories
            .get(full_name)
            .ok_or_else(|| GitHubApiError::not_found("Not Found"))?;

        let start = match params.get("sha") {
            Some(sha) => history
                .iter()
                .position(|c| c.hash.as_str() == *sha)
                .ok_or_else(|| GitHubApiError::not_found(format!("No commit found for SHA: {sha}")))?,
            None => 0,
        };
        let parse_dt = |key: &str| {
            params
                .get(key)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|d| d.with_timezone(&Utc))
        };
        let (since, until) = (parse_dt("since"), parse_dt("until"));
        let listed: Vec<&FetchedCommit> = history[start..]
            .iter()
            .filter(|c| since.is_none_or(|s| c.date >= s))
            .filter(|c| until.is_none_or(|u| c.date <= u))
            .collect();

        let per_page: usize = params.get("per_page").and_then(|v| v.parse().ok()).unwrap_or(30);
        let page: usize = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
        let offset = (page - 1) * per_page;
        let commits: Vec<FetchedCommit> = listed
            .iter()
            .skip(offset)
            .take(per_page)
            .map(|c| (*c).clone())
            .collect();

        let next = (offset + per_page < listed.len()).then(|| {
            let base: Vec<&str> = url
                .split('&')
                .filter(|kv| !kv.starts_with("page="))
                .collect();
            format!("{}&page={}", base.join("&"), page + 1)
        });

        Ok(CommitPage { commits, next })
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    fn api_base(&self) -> &str {
        FAKE_API_BASE
    }

    async fn fetch_repository(&self, name: &RepoName) -> Result<RepositoryMetadata, GitHubApiError> {
        let state = self.state.lock().unwrap();
        let full_name = name.full_name();
        if let Some(status) = state.metadata_failures.get(&full_name) {
            return Err(GitHubApiError::from_status(*status, "injected failure"));
        }
        if !state.histories.contains_key(&full_name) {
            return Err(GitHubApiError::not_found("Not Found"));
        }
        Ok(fake_metadata(name))
    }

    async fn fetch_commit_page(&self, url: &str) -> Result<CommitPage, GitHubApiError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.list(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_newest_first() {
        let history = fake_history(3);
        assert!(history[0].date > history[1].date);
        assert_eq!(history[2].hash, Sha::new("c0002"));
    }

    #[tokio::test]
    async fn fake_paginates_with_absolute_next_urls() {
        let remote = FakeRemote::new();
        remote.set_history("o/r", fake_history(5));

        let first = remote
            .fetch_commit_page(&format!("{FAKE_API_BASE}/repos/o/r/commits?per_page=2"))
            .await
            .unwrap();
        assert_eq!(first.commits.len(), 2);
        let next = first.next.unwrap();
        assert_eq!(next, format!("{FAKE_API_BASE}/repos/o/r/commits?per_page=2&page=2"));

        let third = remote
            .fetch_commit_page(&format!("{FAKE_API_BASE}/repos/o/r/commits?per_page=2&page=3"))
            .await
            .unwrap();
        assert_eq!(third.commits.len(), 1);
        assert!(third.next.is_none());
    }
}
