//! Service configuration.
//!
//! Built once at startup from environment variables and passed by reference to
//! the components that need it. Reading goes through a lookup function so tests
//! never touch the process environment.
//!
//! | Variable                      | Default                        |
//! |-------------------------------|--------------------------------|
//! | `DB_URL`                      | `sqlite://commit_ingest.db`    |
//! | `PORT`                        | `8080`                         |
//! | `ENVIRONMENT`                 | `development`                  |
//! | `GITHUB_TOKEN`                | unset (anonymous requests)     |
//! | `GITHUB_API_BASE`             | `https://api.github.com`       |
//! | `START_DATE` / `END_DATE`     | unset (full history)           |
//! | `DEFAULT_REPO`                | unset                          |
//! | `WORKER_POOL_SIZE`            | `4`                            |
//! | `MONITOR_INTERVAL_MINS`       | `60`                           |
//! | `RATE_LIMIT_MAX_RETRIES`      | `5`                            |
//! | `RATE_LIMIT_MAX_BACKOFF_SECS` | `3600`                         |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::github::{Backoff, DEFAULT_API_BASE};
use crate::types::{DateRange, WindowError, validate_dates};

pub const DEFAULT_DB_URL: &str = "sqlite://commit_ingest.db";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
pub const DEFAULT_MONITOR_INTERVAL_MINS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RATE_LIMIT_MAX_BACKOFF_SECS: u64 = 3600;

/// Errors produced while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid START_DATE/END_DATE: {0}")]
    Window(#[from] WindowError),
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub environment: String,
    pub github_token: Option<String>,
    pub github_api_base: String,

    /// Raw `START_DATE`; see [`Config::date_range`].
    pub start_date: String,
    /// Raw `END_DATE`; see [`Config::date_range`].
    pub end_date: String,

    /// Repository registered at startup, if any.
    pub default_repo: Option<String>,

    pub worker_pool_size: usize,
    pub monitor_interval: Duration,
    pub rate_limit_max_retries: u32,
    pub rate_limit_max_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: DEFAULT_DB_URL.to_string(),
            port: DEFAULT_PORT,
            environment: "development".to_string(),
            github_token: None,
            github_api_base: DEFAULT_API_BASE.to_string(),
            start_date: String::new(),
            end_date: String::new(),
            default_repo: None,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_MINS * 60),
            rate_limit_max_retries: DEFAULT_RATE_LIMIT_MAX_RETRIES,
            rate_limit_max_backoff: Duration::from_secs(DEFAULT_RATE_LIMIT_MAX_BACKOFF_SECS),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        let config = Config {
            database_url: get("DB_URL").unwrap_or(defaults.database_url),
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            environment: get("ENVIRONMENT").unwrap_or(defaults.environment),
            github_token: get("GITHUB_TOKEN"),
            github_api_base: get("GITHUB_API_BASE").unwrap_or(defaults.github_api_base),
            start_date: get("START_DATE").unwrap_or_default(),
            end_date: get("END_DATE").unwrap_or_default(),
            default_repo: get("DEFAULT_REPO"),
            worker_pool_size: positive(&get, "WORKER_POOL_SIZE")?
                .unwrap_or(defaults.worker_pool_size),
            monitor_interval: minutes(&get, "MONITOR_INTERVAL_MINS")?
                .unwrap_or(defaults.monitor_interval),
            rate_limit_max_retries: parse(&get, "RATE_LIMIT_MAX_RETRIES")?
                .unwrap_or(defaults.rate_limit_max_retries),
            rate_limit_max_backoff: positive::<u64, _>(&get, "RATE_LIMIT_MAX_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_max_backoff),
        };

        config.date_range()?;
        Ok(config)
    }

    /// The configured date window, or `None` for full history.
    pub fn date_range(&self) -> Result<Option<DateRange>, WindowError> {
        validate_dates(&self.start_date, &self.end_date)
    }

    /// Backoff policy applied when the remote API rate-limits ingestion.
    pub fn rate_limit_policy(&self) -> Backoff {
        Backoff::rate_limit(self.rate_limit_max_retries, self.rate_limit_max_backoff)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn parse<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn positive<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match parse::<T, G>(get, var)? {
        Some(n) if n <= T::default() => Err(ConfigError::Invalid {
            var,
            value: n.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

fn minutes<G>(get: &G, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    positive::<u64, G>(get, var)?
        .map(|mins| {
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| ConfigError::Invalid {
                    var,
                    value: mins.to_string(),
                    reason: "too many minutes".to_string(),
                })
        })
        .transpose()
}
