//! The remote API port consumed by registration and ingestion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::GitHubApiError;
use crate::types::{NewCommit, RepoName, RepositoryId, RepositoryMetadata, Sha};

/// A commit as reported by the remote, not yet tied to a stored repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedCommit {
    pub hash: Sha,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub url: String,
}

impl FetchedCommit {
    pub fn into_new_commit(self, repo_id: RepositoryId) -> NewCommit {
        NewCommit {
            repo_id,
            hash: self.hash,
            message: self.message,
            author: self.author,
            author_email: self.author_email,
            date: self.date,
            url: self.url,
        }
    }
}

/// One page of a commit listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPage {
    pub commits: Vec<FetchedCommit>,

    /// Absolute URL of the following page; `None` on the last page.
    pub next: Option<String>,
}

/// Read-only access to the source-hosting API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Base URL that commit listing URLs are built from, without a trailing slash.
    fn api_base(&self) -> &str;

    /// Fetches the descriptive metadata of one repository.
    async fn fetch_repository(&self, name: &RepoName) -> Result<RepositoryMetadata, GitHubApiError>;

    /// Fetches the commit page at `url` (a first-page URL or a `next` cursor).
    async fn fetch_commit_page(&self, url: &str) -> Result<CommitPage, GitHubApiError>;
}
