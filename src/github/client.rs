//! Octocrab-backed implementation of [`RemoteApi`].
//!
//! Repository metadata goes through octocrab's typed `get`. Commit pages use the
//! raw `_get` so the `Link` and rate-limit headers stay visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use octocrab::Octocrab;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::backoff::{Backoff, retry_transient};
use super::error::GitHubApiError;
use super::link::parse_link_header;
use super::rate_limit::RateLimitHeaders;
use super::remote::{CommitPage, FetchedCommit, RemoteApi};
use crate::types::{RepoName, RepositoryMetadata, Sha};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// A GitHub API client.
#[derive(Clone)]
pub struct OctocrabClient {
    /// The underlying octocrab client.
    client: Octocrab,

    /// Base URL, without a trailing slash.
    api_base: String,
}

impl OctocrabClient {
    pub fn new(client: Octocrab, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { client, api_base }
    }

    /// Creates a client against `api_base`, authenticated when a token is given.
    pub fn from_token(token: Option<String>, api_base: &str) -> Result<Self, octocrab::Error> {
        let mut builder = Octocrab::builder().base_uri(api_base)?;
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            builder = builder.personal_token(token);
        }
        Ok(Self::new(builder.build()?, api_base))
    }

}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteApi for OctocrabClient {
    fn api_base(&self) -> &str {
        &self.api_base
    }

    #[instrument(skip(self), fields(repo = %name))]
    async fn fetch_repository(&self, name: &RepoName) -> Result<RepositoryMetadata, GitHubApiError> {
        let route = format!("/repos/{}", name.full_name());
        let (client, route) = (&self.client, route.as_str());
        let payload: RepositoryPayload = retry_transient(Backoff::TRANSIENT, || async move {
            client
                .get::<RepositoryPayload, _, ()>(route, None::<&()>)
                .await
                .map_err(GitHubApiError::from_octocrab)
        })
        .await?;
        Ok(payload.into())
    }

    #[instrument(skip(self))]
    async fn fetch_commit_page(&self, url: &str) -> Result<CommitPage, GitHubApiError> {
        let response = self
            .client
            ._get(url)
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = self
            .client
            .body_to_string(response)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        decode_commit_page(status, &headers, &body, Utc::now())
    }
}

/// Turns a raw commit-listing response into a page or a classified error.
pub fn decode_commit_page(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    now: DateTime<Utc>,
) -> Result<CommitPage, GitHubApiError> {
    let limits = RateLimitHeaders::from_headers(headers);
    if limits.is_rate_limited(status) {
        return Err(GitHubApiError::rate_limited(status, limits.wait(now)));
    }
    if status != 200 {
        return Err(GitHubApiError::from_status(status, error_message(body)));
    }

    let payload: Vec<CommitPayload> = serde_json::from_str(body).map_err(|e| {
        GitHubApiError::permanent_without_source(format!("undecodable commit page: {e}"))
    })?;

    let next = headers
        .get(http::header::LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_link_header(v).remove("next"));

    let commits = payload
        .into_iter()
        .filter_map(|commit| {
            let sha = commit.sha.clone();
            let fetched = commit.into_fetched();
            if fetched.is_none() {
                warn!(sha = %sha, "Skipping commit without author or committer date");
            }
            fetched
        })
        .collect();

    Ok(CommitPage { commits, next })
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    description: Option<String>,
    html_url: Option<String>,
    language: Option<String>,
    #[serde(default)]
    forks_count: i64,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    open_issues_count: i64,
    #[serde(default)]
    watchers_count: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<RepositoryPayload> for RepositoryMetadata {
    fn from(p: RepositoryPayload) -> Self {
        RepositoryMetadata {
            name: p.name,
            description: p.description.unwrap_or_default(),
            url: p.html_url.unwrap_or_default(),
            language: p.language.unwrap_or_default(),
            forks_count: p.forks_count,
            stars_count: p.stargazers_count,
            open_issues_count: p.open_issues_count,
            watchers_count: p.watchers_count,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
    html_url: Option<String>,
    url: Option<String>,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: Option<String>,
    author: Option<Signature>,
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl CommitPayload {
    /// Dated by the author, else the committer. `None` when neither carries a date.
    fn into_fetched(self) -> Option<FetchedCommit> {
        let CommitDetail {
            message,
            author,
            committer,
        } = self.commit;
        let date = author
            .as_ref()
            .and_then(|a| a.date)
            .or_else(|| committer.as_ref().and_then(|c| c.date))?;
        let (name, email) = author
            .map(|a| (a.name, a.email))
            .unwrap_or((None, None));

        Some(FetchedCommit {
            hash: Sha::new(self.sha),
            message: message.unwrap_or_default(),
            author: name.unwrap_or_default(),
            author_email: email.unwrap_or_default(),
            date,
            url: self.html_url.or(self.url).unwrap_or_default(),
        })
    }
}
