//! GitHub API error types.
//!
//! Errors are classified for the ingestion loop:
//!
//! - **RateLimited** stops the current fetch cycle; the caller backs off and resumes
//! - **NotFound** means the repository does not exist (or is invisible to the token)
//! - **Transient** errors are retriable with backoff (5xx, network failures)
//! - **Permanent** errors are returned as-is (other 4xx, undecodable bodies)

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// The API refused the request because the rate limit is exhausted.
    ///
    /// `wait` is how long the API asked us to wait, when it said so.
    RateLimited { wait: Option<Duration> },

    /// HTTP 404.
    NotFound,

    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - Network timeouts, connection resets
    Transient,

    /// Permanent error - retrying will not help.
    ///
    /// Examples:
    /// - HTTP 4xx other than 404 and rate limits
    /// - Authentication failures
    /// - Response bodies that do not decode
    Permanent,
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    fn without_source(kind: GitHubErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            source: None,
        }
    }

    pub fn rate_limited(status_code: u16, wait: Option<Duration>) -> Self {
        let message = match wait {
            Some(wait) => format!("rate limit exceeded, retry in {}s", wait.as_secs()),
            None => "rate limit exceeded".to_string(),
        };
        Self::without_source(
            GitHubErrorKind::RateLimited { wait },
            Some(status_code),
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::without_source(GitHubErrorKind::NotFound, Some(404), message.into())
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self::without_source(GitHubErrorKind::Permanent, None, message.into())
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self::without_source(GitHubErrorKind::Transient, None, message.into())
    }

    /// Classifies a non-success HTTP status that carried no rate-limit signal.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            404 => GitHubErrorKind::NotFound,
            code if (500..600).contains(&code) => GitHubErrorKind::Transient,
            _ => GitHubErrorKind::Permanent,
        };
        Self::without_source(kind, Some(status_code), message.into())
    }

    /// Categorizes an octocrab error.
    ///
    /// Octocrab consumes the response headers, so a rate limit seen here never
    /// carries a wait duration.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = Self::extract_status_code(&err);
        let message = err.to_string();

        let kind = match status_code {
            Some(429) => GitHubErrorKind::RateLimited { wait: None },
            Some(403) if is_rate_limit_error(&message) => {
                GitHubErrorKind::RateLimited { wait: None }
            }
            Some(404) => GitHubErrorKind::NotFound,
            Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
            Some(_) => GitHubErrorKind::Permanent,
            None => {
                if is_network_error(&message) {
                    GitHubErrorKind::Transient
                } else {
                    GitHubErrorKind::Permanent
                }
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }

    fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
        match err {
            octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == GitHubErrorKind::NotFound
    }
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
