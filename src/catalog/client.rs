//! Budget- and cache-aware catalog client
//!
//! Wraps a raw [`CatalogApi`] transport with, in order: a short-TTL response
//! cache, a rolling daily quota, a token-bucket throttle, and bounded
//! exponential retry for transient network errors. `RateLimited` is never
//! retried; it marks the quota window exhausted so every subsequent call
//! fails fast without touching the network.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::CatalogApi;
use super::cache::TtlCache;
use crate::config::DiscoveryConfig;
use crate::error::CatalogError;
use crate::model::Episode;

/// Retry policy for transient network errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Rolling 24h request budget. The window opens on first use and resets
/// 24h later, not at a fixed wall-clock boundary.
#[derive(Debug, Default)]
struct QuotaWindow {
    used: u32,
    window_start: Option<DateTime<Utc>>,
}

impl QuotaWindow {
    const WINDOW_HOURS: i64 = 24;

    fn roll(&mut self, now: DateTime<Utc>) {
        match self.window_start {
            Some(start)
                if now.signed_duration_since(start)
                    >= chrono::Duration::hours(Self::WINDOW_HOURS) =>
            {
                self.used = 0;
                self.window_start = Some(now);
            }
            None => self.window_start = Some(now),
            _ => {}
        }
    }

    /// Spend one request from the budget, rolling the window first.
    /// Returns false once the budget is exhausted.
    fn try_spend(&mut self, limit: u32, now: DateTime<Utc>) -> bool {
        self.roll(now);
        if self.used >= limit {
            return false;
        }
        self.used += 1;
        true
    }

    /// The upstream reported its own limit; burn the rest of the window
    /// so we stop trying until it resets.
    fn exhaust(&mut self, limit: u32, now: DateTime<Utc>) {
        self.roll(now);
        self.used = limit;
    }

    fn remaining(&mut self, limit: u32, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        limit.saturating_sub(self.used)
    }
}

/// Counters for cache-efficiency reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiCounters {
    /// Total lookups observed, cache hits included
    pub lookups: u64,
    /// Lookups served from the response cache
    pub cache_hits: u64,
    /// Requests that actually went to the network (retries included)
    pub network_calls: u64,
}

/// The budget-aware client. See module docs for layering.
pub struct CatalogClient {
    inner: Arc<dyn CatalogApi>,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    quota: Mutex<QuotaWindow>,
    daily_quota: u32,
    cache: TtlCache<(String, u32, u32), Episode>,
    retry: RetryConfig,
    lookups: AtomicU64,
    cache_hits: AtomicU64,
    network_calls: AtomicU64,
}

impl CatalogClient {
    pub fn new(inner: Arc<dyn CatalogApi>, config: &DiscoveryConfig) -> Self {
        let quota = Quota::with_period(config.min_request_spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(quota)),
            quota: Mutex::new(QuotaWindow::default()),
            daily_quota: config.daily_quota,
            cache: TtlCache::new(config.response_cache_ttl),
            retry: config.retry.clone(),
            lookups: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            network_calls: AtomicU64::new(0),
        }
    }

    pub fn counters(&self) -> ApiCounters {
        ApiCounters {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
        }
    }

    /// Requests left in the current quota window
    pub fn quota_remaining(&self) -> u32 {
        self.quota.lock().remaining(self.daily_quota, Utc::now())
    }

    /// One network round trip with retry on transient errors only
    async fn fetch_with_retry(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Episode, CatalogError> {
        let mut backoff = self.retry.to_backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.network_calls.fetch_add(1, Ordering::Relaxed);

            match self.inner.fetch_episode(series_id, season, episode).await {
                Err(CatalogError::Network(e)) => {
                    if attempts >= self.retry.max_attempts {
                        warn!(
                            series_id = %series_id,
                            season = season,
                            episode = episode,
                            attempts = attempts,
                            error = %e,
                            "Catalog lookup failed after max retries"
                        );
                        return Err(CatalogError::Network(e));
                    }
                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                series_id = %series_id,
                                season = season,
                                episode = episode,
                                attempt = attempts,
                                error = %e,
                                retry_in_ms = duration.as_millis() as u64,
                                "Catalog lookup failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => return Err(CatalogError::Network(e)),
                    }
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn fetch_episode(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Episode, CatalogError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let key = (series_id.to_string(), season, episode);
        if let Some(cached) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                series_id = %series_id,
                season = season,
                episode = episode,
                "Catalog lookup served from response cache"
            );
            return Ok(cached);
        }

        // Budget check before any network traffic; cache hits above are free
        if !self.quota.lock().try_spend(self.daily_quota, Utc::now()) {
            debug!(series_id = %series_id, "Daily quota spent, failing fast");
            return Err(CatalogError::RateLimited);
        }

        self.limiter.until_ready().await;

        match self.fetch_with_retry(series_id, season, episode).await {
            Ok(ep) => {
                self.cache.set(key, ep.clone());
                Ok(ep)
            }
            Err(CatalogError::RateLimited) => {
                warn!(
                    series_id = %series_id,
                    "Upstream reported request limit, exhausting local window"
                );
                self.quota.lock().exhaust(self.daily_quota, Utc::now());
                Err(CatalogError::RateLimited)
            }
            Err(CatalogError::Malformed(e)) => {
                // A poisoned body must not derail the probing loop
                warn!(
                    series_id = %series_id,
                    season = season,
                    episode = episode,
                    error = %e,
                    "Malformed catalog response treated as not found"
                );
                Err(CatalogError::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}
