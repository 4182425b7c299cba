//! Core domain types for commit ingestion.
//!
//! Identifiers, persisted records and sync windows, designed to encode
//! invariants via the type system.

pub mod ids;
pub mod models;
pub mod window;

pub use ids::{InvalidRepoName, RepoName, RepositoryId, Sha};
pub use models::{
    AuthorCommitCount, Commit, NewCommit, NewRepository, Page, RowRange, Repository,
    RepositoryMetadata,
};
pub use window::{DateRange, SyncWindow, WindowError, validate_dates};
