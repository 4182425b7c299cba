//! Delays between GitHub requests.
//!
//! A single commit page or metadata request that fails transiently (5xx,
//! network) is retried in place with [`Backoff::TRANSIENT`]: 2s, 4s, 8s. An
//! exhausted quota ends the fetch cycle instead, and the orchestrator sleeps
//! according to [`Backoff::rate_limit`] before starting the next one, honouring
//! the API's own hint when it gave one.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{GitHubApiError, GitHubErrorKind};

/// Doubling delays from `base`, each capped at `cap`, for up to `max_retries`
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// In-place retries of one request.
    pub const TRANSIENT: Self = Self {
        max_retries: 3,
        base: Duration::from_secs(2),
        cap: Duration::from_secs(8),
    };

    /// Waits between fetch cycles while rate limited. Without a server hint the
    /// delay starts at one minute (or `cap`, if smaller).
    pub fn rate_limit(max_retries: u32, cap: Duration) -> Self {
        Self {
            max_retries,
            base: Duration::from_secs(60).min(cap),
            cap,
        }
    }

    /// `base * 2^attempt`, capped. `attempt` is 0-based.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// The sleep before retry `attempt` when the server suggested `hint`.
    pub fn wait_for(&self, hint: Option<Duration>, attempt: u32) -> Duration {
        match hint {
            Some(hint) => hint.min(self.cap),
            None => self.delay(attempt),
        }
    }
}

/// Runs `request`, retrying it while it fails with a transient error.
///
/// Rate limits, 404s and permanent failures come back on the first attempt.
pub async fn retry_transient<T, F, Fut>(backoff: Backoff, mut request: F) -> Result<T, GitHubApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Err(e) if e.kind == GitHubErrorKind::Transient && attempt < backoff.max_retries => {
                let delay = backoff.delay(attempt);
                attempt += 1;
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying request");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
