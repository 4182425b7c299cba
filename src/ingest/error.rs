//! Errors surfaced by the ingestion pipeline.

use thiserror::Error;

use crate::events::DispatchError;
use crate::github::GitHubApiError;
use crate::storage::StorageError;
use crate::types::{InvalidRepoName, WindowError};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The caller supplied something unusable (blank or malformed name, bad window).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The repository does not exist remotely, or nothing is tracked yet.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote kept rate-limiting us without progress.
    #[error("rate limited {attempts} times in a row, giving up")]
    RateLimited { attempts: u32 },

    #[error(transparent)]
    Remote(GitHubApiError),

    #[error(transparent)]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("ingestion cancelled")]
    Cancelled,
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<GitHubApiError> for IngestError {
    fn from(e: GitHubApiError) -> Self {
        if e.is_not_found() {
            IngestError::NotFound(e.message)
        } else {
            IngestError::Remote(e)
        }
    }
}

impl From<InvalidRepoName> for IngestError {
    fn from(e: InvalidRepoName) -> Self {
        IngestError::InvalidInput(e.to_string())
    }
}

impl From<WindowError> for IngestError {
    fn from(e: WindowError) -> Self {
        IngestError::InvalidInput(e.to_string())
    }
}
