//! Rate-limit headers.
//!
//! GitHub signals an exhausted quota with HTTP 429, or with HTTP 403 and
//! `X-RateLimit-Remaining: 0`. The wait comes from `Retry-After` (seconds) when
//! present, otherwise from `X-RateLimit-Reset` (epoch seconds) once the quota
//! is exhausted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::HeaderMap;

pub const RETRY_AFTER: &str = "retry-after";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// The rate-limit related headers of one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub retry_after: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<i64>,
}

impl RateLimitHeaders {
    /// Reads the headers; values that are missing or not integers are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        fn value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }

        RateLimitHeaders {
            retry_after: value(headers, RETRY_AFTER),
            remaining: value(headers, RATE_LIMIT_REMAINING),
            reset: value(headers, RATE_LIMIT_RESET),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// True when a response with `status` means "rate limited".
    pub fn is_rate_limited(&self, status: u16) -> bool {
        status == 429 || (status == 403 && self.is_exhausted())
    }

    /// How long to wait before the next request, if the headers say.
    ///
    /// A reset time in the past yields a zero wait.
    pub fn wait(&self, now: DateTime<Utc>) -> Option<Duration> {
        if let Some(secs) = self.retry_after {
            return Some(Duration::from_secs(secs));
        }
        if !self.is_exhausted() {
            return None;
        }
        let reset = self.reset?;
        let secs = reset.saturating_sub(now.timestamp()).max(0);
        Some(Duration::from_secs(secs.unsigned_abs()))
    }
}
