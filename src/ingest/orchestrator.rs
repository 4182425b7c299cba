//! Drives one repository's ingestion run from its window to completion.
//!
//! Each run is a small state machine:
//!
//! ```text
//!            ┌───────────────────────────────────────────────┐
//!            ▼                                               │
//!        Fetching ──(commits)──► Persisting ──(advanced)─────┤
//!         │    │                    │                        │
//!   (empty)    (rate limited)   (checkpoint moved)           │
//!         │    │                    ▼                        │
//!         ▼    └──► RateLimited ◄── Superseded       (rate limited)
//!        Done         │   ▲                                  │
//!                     └───┴──────────── sleep ───────────────┘
//! ```
//!
//! Every persisted batch is followed by a compare-and-set of the repository
//! checkpoint, so a run never rewinds progress made by a newer run. The
//! checkpoint only moves after its batch is stored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{IngestError, Result};
use crate::github::{Backoff, CommitFetcher, FetchCycle};
use crate::storage::Storage;
use crate::types::{NewCommit, RepoName, Repository, Sha, SyncWindow};

/// Where a run currently is.
#[derive(Debug)]
enum SyncState {
    Fetching,
    Persisting(FetchCycle),
    RateLimited(Option<Duration>),
    Done,
    Superseded,
}

impl SyncState {
    fn name(&self) -> &'static str {
        match self {
            SyncState::Fetching => "fetching",
            SyncState::Persisting(_) => "persisting",
            SyncState::RateLimited(_) => "rate_limited",
            SyncState::Done => "done",
            SyncState::Superseded => "superseded",
        }
    }
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The window is exhausted.
    Done,
    /// Another run moved the checkpoint first; this one stepped aside.
    Superseded,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Done => write!(f, "done"),
            SyncOutcome::Superseded => write!(f, "superseded"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub repository: RepoName,
    pub outcome: SyncOutcome,
    /// Batches persisted.
    pub batches: u32,
    pub commits_persisted: u64,
    /// The checkpoint when the run ended.
    pub checkpoint: Sha,
    /// Sleeps taken because of rate limiting.
    pub rate_limit_waits: u32,
}

/// Runs ingestion for a single repository.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    storage: Arc<dyn Storage>,
    fetcher: CommitFetcher,
    rate_limit: Backoff,
}

impl IngestionOrchestrator {
    pub fn new(storage: Arc<dyn Storage>, fetcher: CommitFetcher, rate_limit: Backoff) -> Self {
        Self {
            storage,
            fetcher,
            rate_limit,
        }
    }

    /// Ingests `repository` over `window` until the window is exhausted.
    ///
    /// `window.resume_cursor` must be the checkpoint the caller read from storage;
    /// it is the expected value of the first checkpoint swap.
    ///
    /// Consecutive rate limits without a persisted batch in between are bounded
    /// by the policy's `max_retries`. Cancellation is honoured between steps and
    /// during sleeps; batches already persisted stay persisted.
    #[instrument(
        skip(self, repository, window, cancel),
        fields(repo = %repository.full_name, repo_id = %repository.id)
    )]
    pub async fn run(
        &self,
        repository: &Repository,
        window: SyncWindow,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut window = window;
        let mut report = SyncReport {
            repository: repository.full_name.clone(),
            outcome: SyncOutcome::Done,
            batches: 0,
            commits_persisted: 0,
            checkpoint: window.resume_cursor.clone(),
            rate_limit_waits: 0,
        };
        let mut consecutive_limits: u32 = 0;
        let mut state = SyncState::Fetching;

        info!(
            cursor = %window.resume_cursor.short(),
            ranged = window.range.is_some(),
            "Ingestion started"
        );

        loop {
            debug!(state = state.name(), "Ingestion step");
            state = match state {
                SyncState::Fetching => {
                    let cycle = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(self.cancelled(&report)),
                        cycle = self.fetcher.fetch_cycle(&repository.full_name, &window) => cycle?,
                    };
                    if !cycle.commits.is_empty() {
                        SyncState::Persisting(cycle)
                    } else if let Some(signal) = cycle.rate_limit {
                        SyncState::RateLimited(signal.wait)
                    } else {
                        SyncState::Done
                    }
                }

                SyncState::Persisting(cycle) => {
                    if cancel.is_cancelled() {
                        return Err(self.cancelled(&report));
                    }
                    let Some(next) = cycle.last_seen.clone() else {
                        // Non-empty cycles always record their last commit.
                        return Ok(self.finish(report, SyncOutcome::Done));
                    };

                    let batch: Vec<NewCommit> = cycle
                        .commits
                        .into_iter()
                        .map(|c| c.into_new_commit(repository.id))
                        .collect();
                    let written = self.storage.upsert_commits(&batch).await.map_err(|e| {
                        warn!(error = %e, batch = batch.len(), "Failed to persist batch");
                        e
                    })?;

                    report.commits_persisted += written;
                    report.batches += 1;

                    let expected = window.resume_cursor.clone();
                    if !self
                        .storage
                        .advance_checkpoint(repository.id, &expected, &next)
                        .await?
                    {
                        info!(
                            expected = %expected.short(),
                            "Checkpoint moved by another run"
                        );
                        SyncState::Superseded
                    } else {
                        report.checkpoint = next.clone();
                        consecutive_limits = 0;
                        window = window.resuming_from(next);
                        debug!(
                            written,
                            checkpoint = %report.checkpoint.short(),
                            "Batch persisted"
                        );
                        match cycle.rate_limit {
                            Some(signal) => SyncState::RateLimited(signal.wait),
                            None => SyncState::Fetching,
                        }
                    }
                }

                SyncState::RateLimited(hint) => {
                    consecutive_limits += 1;
                    if consecutive_limits > self.rate_limit.max_retries {
                        warn!(attempts = consecutive_limits, "Rate limit retries exhausted");
                        return Err(IngestError::RateLimited {
                            attempts: consecutive_limits,
                        });
                    }
                    let delay = self.rate_limit.wait_for(hint, consecutive_limits - 1);
                    report.rate_limit_waits += 1;
                    warn!(
                        attempt = consecutive_limits,
                        delay_secs = delay.as_secs(),
                        "Rate limited, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(self.cancelled(&report)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    SyncState::Fetching
                }

                SyncState::Done => return Ok(self.finish(report, SyncOutcome::Done)),
                SyncState::Superseded => {
                    return Ok(self.finish(report, SyncOutcome::Superseded));
                }
            };
        }
    }

    fn finish(&self, mut report: SyncReport, outcome: SyncOutcome) -> SyncReport {
        report.outcome = outcome;
        info!(
            outcome = %outcome,
            batches = report.batches,
            commits = report.commits_persisted,
            checkpoint = %report.checkpoint.short(),
            "Ingestion finished"
        );
        report
    }

    fn cancelled(&self, report: &SyncReport) -> IngestError {
        info!(
            batches = report.batches,
            commits = report.commits_persisted,
            "Ingestion cancelled"
        );
        IngestError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{FetchedCommit, RemoteApi};
    use crate::storage::{MemoryStorage, contract::new_repo};
    use crate::test_utils::{FakeRemote, fake_history};
    use crate::types::validate_dates;
    use chrono::{TimeZone, Utc};

    const REPO: &str = "octo/widgets";

    struct Harness {
        storage: Arc<MemoryStorage>,
        remote: Arc<FakeRemote>,
        repo: Repository,
    }

    impl Harness {
        async fn new(history: Vec<FetchedCommit>) -> Self {
            let storage = Arc::new(MemoryStorage::new());
            let remote = Arc::new(FakeRemote::new());
            remote.set_history(REPO, history);
            let repo = storage.create_repository(new_repo(REPO)).await.unwrap();
            Self {
                storage,
                remote,
                repo,
            }
        }

        fn orchestrator(&self, policy: Backoff) -> IngestionOrchestrator {
            let remote: Arc<dyn RemoteApi> = self.remote.clone();
            IngestionOrchestrator::new(self.storage.clone(), CommitFetcher::new(remote), policy)
        }

        async fn checkpoint(&self) -> Sha {
            self.storage
                .get_repository(self.repo.id)
                .await
                .unwrap()
                .unwrap()
                .last_commit_sha
        }
    }

    fn policy() -> Backoff {
        Backoff::rate_limit(3, Duration::from_secs(600))
    }

    // ─── Happy Path ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn full_sync_ingests_everything_in_bounded_batches() {
        let h = Harness::new(fake_history(2500)).await;
        let report = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Done);
        assert_eq!(report.batches, 3);
        assert_eq!(report.commits_persisted, 2500);
        assert_eq!(report.checkpoint, Sha::new("c2499"));
        assert_eq!(h.checkpoint().await, Sha::new("c2499"));
        assert_eq!(h.storage.count_commits().await.unwrap(), 2500);
    }

    #[tokio::test]
    async fn rerun_from_checkpoint_is_a_no_op() {
        let h = Harness::new(fake_history(150)).await;
        let orchestrator = h.orchestrator(policy());
        orchestrator
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap();

        let requests_before = h.remote.requested_urls().len();
        let window = SyncWindow::new(None, h.checkpoint().await);
        let report = orchestrator
            .run(&h.repo, window, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Done);
        assert_eq!(report.commits_persisted, 0);
        assert_eq!(report.checkpoint, Sha::new("c0149"));
        assert_eq!(h.remote.requested_urls().len(), requests_before + 1);
        assert_eq!(h.storage.count_commits().await.unwrap(), 150);
    }

    #[tokio::test]
    async fn date_range_limits_ingested_commits() {
        // 48 hourly commits back from 2024-03-01T00:00Z; only Feb 29 is in range.
        let h = Harness::new(fake_history(48)).await;
        let range = validate_dates("2024-02-29", "2024-02-29").unwrap();
        let report = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::new(range, Sha::empty()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.commits_persisted, 24);
        let day_start = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        let stored = h
            .storage
            .commits_for_repository(h.repo.id, crate::types::RowRange { offset: 0, limit: 100 })
            .await
            .unwrap();
        assert!(stored.iter().all(|c| c.date >= day_start));
    }

    #[tokio::test]
    async fn empty_repository_finishes_without_batches() {
        let h = Harness::new(Vec::new()).await;
        let report = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Done);
        assert_eq!(report.batches, 0);
        assert!(h.checkpoint().await.is_empty());
    }

    // ─── Rate Limiting ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn rate_limit_mid_cycle_persists_then_resumes() {
        let h = Harness::new(fake_history(250)).await;
        // Third page of the first cycle is rate limited.
        h.remote.rate_limit_request(2, Some(Duration::from_secs(30)));

        let report = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Done);
        assert_eq!(report.rate_limit_waits, 1);
        assert_eq!(report.commits_persisted, 250);
        assert_eq!(h.checkpoint().await, Sha::new("c0249"));

        let urls = h.remote.requested_urls();
        assert!(urls[3].ends_with("&sha=c0199"), "resumed from {}", urls[3]);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_rate_limits_are_bounded() {
        let h = Harness::new(fake_history(10)).await;
        for i in 0..10 {
            h.remote.rate_limit_request(i, None);
        }

        let err = h
            .orchestrator(Backoff::rate_limit(2, Duration::from_secs(60)))
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::RateLimited { attempts: 3 }));
        assert_eq!(h.remote.requested_urls().len(), 3);
        assert!(h.checkpoint().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let h = Harness::new(fake_history(10)).await;
        h.remote.rate_limit_request(0, Some(Duration::from_secs(3600)));

        let cancel = CancellationToken::new();
        let orchestrator = h.orchestrator(Backoff::rate_limit(3, Duration::from_secs(3600)));
        let repo = h.repo.clone();
        let token = cancel.clone();
        let run = tokio::spawn(async move {
            orchestrator.run(&repo, SyncWindow::full(), &token).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run should stop promptly")
            .unwrap();

        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_before_start_fetches_nothing() {
        let h = Harness::new(fake_history(10)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &cancel)
            .await;

        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert!(h.remote.requested_urls().is_empty());
    }

    // ─── Failures ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn persistence_failure_leaves_checkpoint_alone() {
        let h = Harness::new(fake_history(20)).await;
        h.storage.fail_upserts(true);

        let err = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Persistence(_)));
        assert!(h.checkpoint().await.is_empty());
        assert_eq!(h.storage.count_commits().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn permanent_remote_failure_is_reported() {
        let h = Harness::new(fake_history(20)).await;
        h.remote.fail_request(0, 403);

        let err = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Remote(_)));
    }

    #[tokio::test]
    async fn stale_window_is_superseded() {
        let h = Harness::new(fake_history(20)).await;
        h.storage
            .advance_checkpoint(h.repo.id, &Sha::empty(), &Sha::new("c0005"))
            .await
            .unwrap();

        let report = h
            .orchestrator(policy())
            .run(&h.repo, SyncWindow::full(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Superseded);
        assert_eq!(report.batches, 1);
        assert_eq!(h.checkpoint().await, Sha::new("c0005"));
    }
}
