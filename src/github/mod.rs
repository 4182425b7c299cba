//! GitHub REST access: the remote API port, its octocrab adapter and the
//! paginated commit fetcher.
//!
//! Key features:
//! - Cursor-based pagination via the `Link` header
//! - Rate-limit detection from `Retry-After` / `X-RateLimit-*` headers
//! - Doubling backoff for transient failures and exhausted quotas
//! - A per-cycle commit cap so one repository cannot monopolize a sync

mod backoff;
mod client;
mod error;
mod fetcher;
mod link;
mod rate_limit;
mod remote;

pub use backoff::{Backoff, retry_transient};
pub use client::{DEFAULT_API_BASE, OctocrabClient, decode_commit_page};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use fetcher::{
    CommitFetcher, FetchCycle, MAX_COMMITS_PER_CYCLE, PER_PAGE, RateLimitSignal, build_commit_url,
};
pub use link::parse_link_header;
pub use rate_limit::RateLimitHeaders;
pub use remote::{CommitPage, FetchedCommit, RemoteApi};
