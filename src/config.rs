//! Discovery engine configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::catalog::client::RetryConfig;

/// Tunables for the catalog client, prober, worker, and cache.
///
/// Constructed directly by a composition root, or from environment
/// variables via [`DiscoveryConfig::from_env`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Upstream catalog API key
    pub api_key: String,

    /// Upstream catalog base URL
    pub base_url: String,

    /// Local daily request budget; kept under the upstream's hard limit so
    /// other consumers of the key retain headroom
    pub daily_quota: u32,

    /// Minimum spacing between upstream requests
    pub min_request_spacing: Duration,

    /// TTL for the client's short-lived response cache
    pub response_cache_ttl: Duration,

    /// How long a discovered season stays valid in the cache store
    pub cache_duration: Duration,

    /// Upper bound on episode numbers probed within one season
    pub max_episodes_per_season: u32,

    /// Consecutive `NotFound` results before a season is assumed ended
    pub max_consecutive_failures: u32,

    /// Upper bound on season numbers probed within one series
    pub max_seasons: u32,

    /// Consecutive empty seasons before a series is assumed ended
    pub max_consecutive_empty_seasons: u32,

    /// Politeness delay between probes, on top of the client throttle
    pub probe_delay: Duration,

    /// Pause between background jobs
    pub inter_job_delay: Duration,

    /// How often the idle worker re-checks the backlog without a wakeup
    pub queue_poll_interval: Duration,

    /// Hard ceiling on a single probe, including client retries
    pub probe_timeout: Duration,

    /// Retry policy for transient network errors
    pub retry: RetryConfig,

    /// Assumed seasons per series, for call estimates on unknown series
    pub assumed_seasons: u32,

    /// Assumed episodes per season, for call estimates
    pub assumed_episodes_per_season: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://www.omdbapi.com".to_string(),
            daily_quota: 900,
            min_request_spacing: Duration::from_millis(250),
            response_cache_ttl: Duration::from_secs(3600),
            cache_duration: Duration::from_secs(24 * 3600),
            max_episodes_per_season: 50,
            max_consecutive_failures: 3,
            max_seasons: 20,
            max_consecutive_empty_seasons: 2,
            probe_delay: Duration::from_millis(150),
            inter_job_delay: Duration::from_secs(2),
            queue_poll_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
            assumed_seasons: 5,
            assumed_episodes_per_season: 10,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from `EPISODARR_*` environment variables,
    /// falling back to defaults for everything except the API key.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            api_key: env::var("EPISODARR_API_KEY")
                .context("EPISODARR_API_KEY is required")?,

            base_url: env::var("EPISODARR_BASE_URL")
                .unwrap_or(defaults.base_url),

            daily_quota: parse_env("EPISODARR_DAILY_QUOTA", defaults.daily_quota)?,

            min_request_spacing: Duration::from_millis(parse_env(
                "EPISODARR_REQUEST_SPACING_MS",
                defaults.min_request_spacing.as_millis() as u64,
            )?),

            response_cache_ttl: Duration::from_secs(parse_env(
                "EPISODARR_RESPONSE_CACHE_TTL_SECS",
                defaults.response_cache_ttl.as_secs(),
            )?),

            cache_duration: Duration::from_secs(parse_env(
                "EPISODARR_CACHE_DURATION_SECS",
                defaults.cache_duration.as_secs(),
            )?),

            max_episodes_per_season: parse_env(
                "EPISODARR_MAX_EPISODES",
                defaults.max_episodes_per_season,
            )?,

            max_consecutive_failures: parse_env(
                "EPISODARR_MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,

            max_seasons: parse_env("EPISODARR_MAX_SEASONS", defaults.max_seasons)?,

            max_consecutive_empty_seasons: parse_env(
                "EPISODARR_MAX_EMPTY_SEASONS",
                defaults.max_consecutive_empty_seasons,
            )?,

            probe_delay: Duration::from_millis(parse_env(
                "EPISODARR_PROBE_DELAY_MS",
                defaults.probe_delay.as_millis() as u64,
            )?),

            inter_job_delay: Duration::from_millis(parse_env(
                "EPISODARR_INTER_JOB_DELAY_MS",
                defaults.inter_job_delay.as_millis() as u64,
            )?),

            queue_poll_interval: Duration::from_secs(parse_env(
                "EPISODARR_QUEUE_POLL_SECS",
                defaults.queue_poll_interval.as_secs(),
            )?),

            probe_timeout: Duration::from_secs(parse_env(
                "EPISODARR_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout.as_secs(),
            )?),

            retry: defaults.retry,
            assumed_seasons: defaults.assumed_seasons,
            assumed_episodes_per_season: defaults.assumed_episodes_per_season,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.max_consecutive_empty_seasons, 2);
        assert!(config.daily_quota < 1000);
        assert!(config.cache_duration >= Duration::from_secs(3600));
    }
}
