//! Paginated commit fetching.
//!
//! One *fetch cycle* walks the commit listing from a starting URL, following
//! `next` cursors until one of:
//!
//! - `MAX_COMMITS_PER_CYCLE` commits have been collected (the last page is truncated)
//! - a page comes back empty, or has no `next` cursor
//! - the API reports an exhausted rate limit
//!
//! A rate limit ends the cycle gracefully: the commits gathered so far are
//! returned together with the wait hint. Any other error aborts the cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::error::{GitHubApiError, GitHubErrorKind};
use super::remote::{FetchedCommit, RemoteApi};
use super::backoff::{Backoff, retry_transient};
use crate::types::{RepoName, Sha, SyncWindow};

/// Page size requested from the API (its maximum).
pub const PER_PAGE: u32 = 100;

/// Upper bound on commits gathered by one fetch cycle.
pub const MAX_COMMITS_PER_CYCLE: usize = 1000;

/// Builds the first-page URL of a commit listing.
///
/// `{api_base}/repos/{owner}/{name}/commits?per_page=100[&since=..][&until=..][&sha=..]`
pub fn build_commit_url(api_base: &str, repo: &RepoName, window: &SyncWindow) -> String {
    let mut url = format!(
        "{}/repos/{}/commits?per_page={}",
        api_base.trim_end_matches('/'),
        repo.full_name(),
        PER_PAGE
    );
    if let Some(range) = &window.range {
        url.push_str("&since=");
        url.push_str(&range.since_param());
        url.push_str("&until=");
        url.push_str(&range.until_param());
    }
    if window.is_resume() {
        url.push_str("&sha=");
        url.push_str(window.resume_cursor.as_str());
    }
    url
}

/// A rate-limit signal observed during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// How long the API asked us to wait, if it said.
    pub wait: Option<Duration>,
}

/// The outcome of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchCycle {
    pub commits: Vec<FetchedCommit>,

    /// Hash of the last commit collected; the next cycle resumes from it.
    pub last_seen: Option<Sha>,

    /// Set when the cycle stopped because of a rate limit.
    pub rate_limit: Option<RateLimitSignal>,

    /// Number of pages successfully fetched.
    pub pages: u32,
}

/// Fetches commits through a [`RemoteApi`].
#[derive(Clone)]
pub struct CommitFetcher {
    remote: Arc<dyn RemoteApi>,
}

impl CommitFetcher {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    /// Runs one fetch cycle for `repo` over `window`.
    ///
    /// When the window resumes from a cursor, the listing starts at that commit;
    /// it is dropped from the first page because it was already ingested.
    #[instrument(skip(self, window), fields(repo = %repo, cursor = %window.resume_cursor.short()))]
    pub async fn fetch_cycle(
        &self,
        repo: &RepoName,
        window: &SyncWindow,
    ) -> Result<FetchCycle, GitHubApiError> {
        let mut next_url = Some(build_commit_url(self.remote.api_base(), repo, window));
        let mut cycle = FetchCycle::default();

        while let Some(url) = next_url.take() {
            let remote = &self.remote;
            let current = url.as_str();
            let page =
                match retry_transient(Backoff::TRANSIENT, move || remote.fetch_commit_page(current))
                    .await
                {
                    Ok(page) => page,
                    Err(GitHubApiError {
                        kind: GitHubErrorKind::RateLimited { wait },
                        ..
                    }) => {
                        debug!(?wait, collected = cycle.commits.len(), "rate limited mid-cycle");
                        cycle.rate_limit = Some(RateLimitSignal { wait });
                        break;
                    }
                    Err(e) => return Err(e),
                };

            let first_page = cycle.pages == 0;
            cycle.pages += 1;
            if page.commits.is_empty() {
                break;
            }

            let mut batch = page.commits;
            if first_page
                && window.is_resume()
                && batch.first().map(|c| &c.hash) == Some(&window.resume_cursor)
            {
                batch.remove(0);
            }

            let room = MAX_COMMITS_PER_CYCLE - cycle.commits.len();
            if batch.len() >= room {
                batch.truncate(room);
                cycle.commits.extend(batch);
                break;
            }
            cycle.commits.extend(batch);
            next_url = page.next;
        }

        cycle.last_seen = cycle.commits.last().map(|c| c.hash.clone());
        debug!(
            commits = cycle.commits.len(),
            pages = cycle.pages,
            rate_limited = cycle.rate_limit.is_some(),
            "fetch cycle finished"
        );
        Ok(cycle)
    }
}
