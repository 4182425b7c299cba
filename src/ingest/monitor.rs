//! Periodic re-synchronisation of every tracked repository.
//!
//! At most one scheduler loop runs per process. The running flag is claimed
//! with a compare-and-swap before the loop is spawned and released when the
//! loop exits, however it exits.
//!
//! Each tick re-queues every tracked repository from its checkpoint. Listing
//! from the checkpoint walks towards older history, so a re-sync only picks up
//! commits older than the oldest one already ingested. Commits pushed after the
//! first run's head are not fetched.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::Result;

/// Owns the single-instance flag and tick interval of the monitoring loop.
#[derive(Debug)]
pub struct MonitoringScheduler {
    running: AtomicBool,
    interval: Duration,
}

/// Clears the running flag on drop.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MonitoringScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the running flag. Exactly one concurrent caller gets `true`; that
    /// caller must follow up with [`MonitoringScheduler::run`].
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Calls `tick` once per interval, first after one full interval, until
    /// `cancel` fires.
    ///
    /// A failing tick is logged and the loop carries on. The running flag is
    /// cleared when this returns.
    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize>>,
    {
        let _guard = RunningGuard(&self.running);
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Monitoring started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Monitoring tick");
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = tick() => outcome,
            };
            match outcome {
                Ok(scheduled) => info!(scheduled, "Scheduled re-sync of tracked repositories"),
                Err(e) => warn!(error = %e, "Monitoring tick failed"),
            }
        }

        info!("Monitoring stopped");
    }
}
