//! Storage port for tracked repositories and their commits.
//!
//! The ingestion core only talks to storage through the [`Storage`] trait. Two
//! adapters are provided:
//!
//! - [`SqliteStorage`]: durable SQLite storage (`repositories` and `commits` tables)
//! - [`MemoryStorage`]: in-process storage for tests and local experiments
//!
//! # Contract
//!
//! - `full_name` is unique across repositories; creating a duplicate is a
//!   [`StorageError::Conflict`].
//! - `hash` is unique across commits; [`Storage::upsert_commits`] is idempotent and
//!   applies a batch all-or-nothing.
//! - [`Storage::advance_checkpoint`] is a single-row compare-and-set, which
//!   serializes concurrent checkpoint writers for the same repository.

use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    AuthorCommitCount, Commit, NewCommit, NewRepository, RowRange, RepoName, Repository,
    RepositoryId, Sha,
};

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Errors returned by storage adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The underlying engine failed.
    #[error("storage backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// The underlying engine failed without a structured error.
    #[error("storage backend error: {0}")]
    BackendMessage(String),
}

impl StorageError {
    pub fn backend(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        StorageError::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence operations consumed by the ingestion pipeline and the HTTP API.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates a repository record with an empty checkpoint.
    async fn create_repository(&self, repo: NewRepository) -> Result<Repository>;

    /// Looks a repository up by its unique full name.
    async fn find_repository(&self, full_name: &RepoName) -> Result<Option<Repository>>;

    /// Looks a repository up by id.
    async fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>>;

    /// Lists all tracked repositories in creation order.
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Moves the checkpoint from `expected` to `next`.
    ///
    /// Returns `Ok(false)` without writing when the stored checkpoint is no
    /// longer `expected`, and [`StorageError::NotFound`] for an unknown id.
    async fn advance_checkpoint(
        &self,
        id: RepositoryId,
        expected: &Sha,
        next: &Sha,
    ) -> Result<bool>;

    /// Inserts or updates commits keyed by hash. Returns the number of commits written.
    ///
    /// A batch naming an unknown repository is rejected whole with
    /// [`StorageError::NotFound`].
    async fn upsert_commits(&self, commits: &[NewCommit]) -> Result<u64>;

    /// Looks a commit up by hash.
    async fn find_commit(&self, hash: &Sha) -> Result<Option<Commit>>;

    /// Total number of stored commits.
    async fn count_commits(&self) -> Result<u64>;

    /// Commits of one repository, newest first.
    async fn commits_for_repository(
        &self,
        id: RepositoryId,
        range: RowRange,
    ) -> Result<Vec<Commit>>;

    /// Commit counts grouped by author name, highest count first.
    async fn top_commit_authors(&self, range: RowRange) -> Result<Vec<AuthorCommitCount>>;
}
