//! Configuration types for rfm-harvester

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Base URL of the public user service.
pub const DEFAULT_BASE_URL: &str = "https://zara-boost-hackathon.nuwe.io";

/// Retry policy for transport failures.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per request, the first one included (default: 3)
    pub max_attempts: u32,

    /// Wait after the first failed attempt (default: 1 second)
    pub initial_delay: Duration,

    /// Upper bound for a single wait (default: 60 seconds)
    pub max_delay: Duration,

    /// Multiplier applied to the wait after every failure (default: 2.0)
    pub backoff_multiplier: f64,

    /// Stretch each wait by a random factor in `[1, 2)` (default: false)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Settings for one pipeline run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the remote service; `/users` and `/users/{id}` hang off it
    pub base_url: String,

    /// Pending identifiers, one per line (default: "user_ids.txt")
    pub pending_path: PathBuf,

    /// CSV output (default: "users.csv")
    pub output_path: PathBuf,

    /// Ceiling on simultaneous fetches (default: 6)
    pub max_concurrent: usize,

    /// Bound on a single request, connect to last body byte (default: 10 seconds)
    pub request_timeout: Duration,

    /// Removals recorded in the side log before the pending file is rewritten (default: 64)
    pub compact_every: usize,

    /// Transport retry policy
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            pending_path: PathBuf::from("user_ids.txt"),
            output_path: PathBuf::from("users.csv"),
            max_concurrent: 6,
            request_timeout: Duration::from_secs(10),
            compact_every: 64,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Check the settings before any file or socket is touched.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::config("base_url", format!("invalid base URL: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::config(
                "base_url",
                format!("{} cannot carry a path", self.base_url),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::config("max_concurrent", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout", "must be non-zero"));
        }
        if self.compact_every == 0 {
            return Err(Error::config("compact_every", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.backoff_multiplier > 0.0) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be a positive number",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected_key(config: &Config) -> Option<String> {
        match config.validate() {
            Err(Error::Config { key, .. }) => key,
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(()) => None,
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 6);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert!(!config.retry.jitter);
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let config = Config {
            max_concurrent: 0,
            ..Config::default()
        };
        assert_eq!(rejected_key(&config).as_deref(), Some("max_concurrent"));
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        for base_url in ["not a url", "mailto:ops@example.com"] {
            let config = Config {
                base_url: base_url.to_string(),
                ..Config::default()
            };
            assert_eq!(rejected_key(&config).as_deref(), Some("base_url"));
        }
    }

    #[test]
    fn retry_settings_are_checked() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert_eq!(rejected_key(&config).as_deref(), Some("retry.max_attempts"));

        let mut config = Config::default();
        config.retry.backoff_multiplier = f64::NAN;
        assert_eq!(
            rejected_key(&config).as_deref(),
            Some("retry.backoff_multiplier")
        );
    }
}
