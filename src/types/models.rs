//! Persisted records: tracked repositories and their commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RepoName, RepositoryId, Sha};

/// Descriptive metadata snapshot of a repository as reported by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub language: String,
    pub forks_count: i64,
    pub stars_count: i64,
    pub open_issues_count: i64,
    pub watchers_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A repository about to be created in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    pub full_name: RepoName,
    pub metadata: RepositoryMetadata,
    pub fetched_at: DateTime<Utc>,
}

/// A tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub full_name: RepoName,
    #[serde(flatten)]
    pub metadata: RepositoryMetadata,
    pub fetched_at: DateTime<Utc>,
    /// Checkpoint: the last successfully ingested commit. Empty until the first
    /// batch is persisted.
    pub last_commit_sha: Sha,
}

/// A commit about to be upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub repo_id: RepositoryId,
    pub hash: Sha,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub url: String,
}

/// A stored commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: i64,
    pub repo_id: RepositoryId,
    #[serde(rename = "sha")]
    pub hash: Sha,
    pub message: String,
    pub author: String,
    pub author_email: String,
    #[serde(rename = "author_date")]
    pub date: DateTime<Utc>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Number of stored commits attributed to one author name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCommitCount {
    pub author: String,
    pub commit_count: i64,
}

/// A 1-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: u32,
    page_size: u32,
}

impl Page {
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    /// Returns `None` when either value is zero.
    pub fn new(page: u32, page_size: u32) -> Option<Self> {
        (page > 0 && page_size > 0).then_some(Page { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of rows before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// The same page window widened by one row, used to detect a following page.
    pub fn rows(&self) -> RowRange {
        RowRange {
            offset: self.offset(),
            limit: u64::from(self.page_size) + 1,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: Self::DEFAULT_PAGE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Raw offset/limit pair handed to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub offset: u64,
    pub limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rejects_zero() {
        assert!(Page::new(0, 10).is_none());
        assert!(Page::new(1, 0).is_none());
        assert!(Page::new(1, 1).is_some());
    }

    #[test]
    fn page_offsets() {
        assert_eq!(Page::new(1, 10).unwrap().offset(), 0);
        assert_eq!(Page::new(3, 25).unwrap().offset(), 50);
    }

    #[test]
    fn row_range_fetches_one_extra_row() {
        let rows = Page::new(2, 10).unwrap().rows();
        assert_eq!(rows, RowRange { offset: 10, limit: 11 });
    }

    #[test]
    fn default_page_is_first_ten() {
        let page = Page::default();
        assert_eq!(page.page(), 1);
        assert_eq!(page.page_size(), 10);
    }

    #[test]
    fn commit_json_uses_api_field_names() {
        let now = Utc::now();
        let commit = Commit {
            id: 1,
            repo_id: RepositoryId(7),
            hash: Sha::new("abc"),
            message: "init".to_string(),
            author: "Octo".to_string(),
            author_email: "octo@example.com".to_string(),
            date: now,
            url: "https://example.com/c/abc".to_string(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&commit).unwrap();
        assert_eq!(json["sha"], "abc");
        assert!(json.get("author_date").is_some());
        assert!(json.get("hash").is_none());
    }
}
