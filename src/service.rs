//! Consumer-facing discovery service
//!
//! The composition root builds exactly one `DiscoveryService` and calls
//! `start()`; `stop()` halts the worker loop cooperatively. The read path
//! never blocks on background-queue state: a cache miss returns `None` and
//! quietly queues discovery instead.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{CatalogApi, CatalogClient, OmdbTransport};
use crate::config::DiscoveryConfig;
use crate::error::ProbeError;
use crate::model::{Episode, JobPriority};
use crate::persist::KeyValueStore;
use crate::prober::{EpisodeProber, ProbeProgress};
use crate::queue::{JobQueue, QueueStatus};
use crate::store::{CacheStore, SeriesStats};
use crate::worker::{self, WorkerContext};

/// Outcome of a background discovery request
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiscoveryRequest {
    /// Whether a job is now queued (false when the cache is already valid)
    pub queued: bool,
    /// Rough upstream-call cost of completing discovery
    pub estimated_calls: u32,
}

/// Discovery progress for one series
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiscoveryProgress {
    pub episodes_discovered: usize,
    /// Confirmed episodes once the series is fully cached, otherwise the
    /// assumed total so the percentage stays monotonic during discovery
    pub total_episodes: usize,
    pub discovery_percentage: u32,
    pub estimated_remaining_calls: u32,
}

/// Engine-wide counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceStats {
    pub cached_episodes: usize,
    pub queue_items: usize,
    /// Share of lookups served without touching the network, 0.0..=1.0
    pub api_efficiency: f64,
}

pub struct DiscoveryService {
    config: Arc<DiscoveryConfig>,
    catalog: Arc<CatalogClient>,
    store: Arc<CacheStore>,
    queue: Arc<JobQueue>,
    progress_tx: watch::Sender<ProbeProgress>,
    cancel: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Build the service against the real HTTP transport
    pub async fn new(config: DiscoveryConfig, persist: Arc<dyn KeyValueStore>) -> Self {
        let transport = Arc::new(OmdbTransport::new(&config));
        Self::with_catalog(config, persist, transport).await
    }

    /// Build against any transport; used by tests to inject fakes
    pub async fn with_catalog(
        config: DiscoveryConfig,
        persist: Arc<dyn KeyValueStore>,
        transport: Arc<dyn CatalogApi>,
    ) -> Self {
        let catalog = Arc::new(CatalogClient::new(transport, &config));
        let store = Arc::new(CacheStore::restore(persist.clone(), &config).await);
        let queue = Arc::new(JobQueue::restore(persist).await);
        let (progress_tx, _) = watch::channel(ProbeProgress::default());

        Self {
            config: Arc::new(config),
            catalog,
            store,
            queue,
            progress_tx,
            cancel: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background worker loop. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let ctx = WorkerContext {
            prober: self.prober(),
            store: self.store.clone(),
            queue: self.queue.clone(),
            config: self.config.clone(),
            progress: self.progress_tx.clone(),
            cancel: self.cancel.lock().clone(),
        };
        *worker = Some(tokio::spawn(worker::run(ctx)));
    }

    /// Cancel the worker and wait for it to exit. In-flight probes stop at
    /// the next suspension point; a partially probed season is requeued,
    /// never written as fully loaded.
    pub async fn stop(&self) {
        let token = {
            let mut cancel = self.cancel.lock();
            let token = cancel.clone();
            *cancel = CancellationToken::new();
            token
        };
        token.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Discovery worker did not shut down cleanly");
            }
        }
        info!("Discovery service stopped");
    }

    /// Cached episode lookup. A miss means "not yet available": discovery
    /// is queued in the background and the caller re-reads later.
    /// `force_refresh` drops the series' cache and queues a high-priority
    /// rediscovery.
    pub async fn get_episode(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
        force_refresh: bool,
    ) -> Option<Episode> {
        if force_refresh {
            self.force_refresh(series_id, None).await;
            return None;
        }

        match self.store.get_episode(series_id, season, episode) {
            Some(ep) => Some(ep),
            None => {
                if !self.store.is_valid(series_id) {
                    self.queue
                        .enqueue(series_id, None, JobPriority::Medium)
                        .await;
                }
                None
            }
        }
    }

    /// Foreground discovery for the season a user is looking at right now.
    /// Serves from cache when valid; errors degrade to an empty list (the
    /// worker will retry via the queue), and a mid-season rate limit still
    /// returns the episodes found so far.
    pub async fn discover_season(&self, series_id: &str, season: u32) -> Vec<Episode> {
        if let Some(episodes) = self.store.get_season(series_id, season) {
            return episodes;
        }

        let cancel = self.cancel.lock().clone();
        match self
            .prober()
            .discover_season(series_id, season, &self.progress_tx, &cancel)
            .await
        {
            Ok(probe) => {
                if !probe.episodes.is_empty() {
                    self.store
                        .insert_season(
                            series_id,
                            season,
                            probe.episodes.clone(),
                            probe.fully_loaded,
                        )
                        .await;
                }
                probe.episodes
            }
            Err(ProbeError::SeasonNotFound) => Vec::new(),
            Err(e) => {
                warn!(
                    series_id = %series_id,
                    season = season,
                    error = %e,
                    "Foreground season discovery failed"
                );
                Vec::new()
            }
        }
    }

    /// Queue full-series discovery in the background
    pub async fn discover_series(&self, series_id: &str, title: &str) -> DiscoveryRequest {
        if self.store.is_valid(series_id) {
            return DiscoveryRequest {
                queued: false,
                estimated_calls: 0,
            };
        }

        self.queue
            .enqueue(series_id, Some(title), JobPriority::Medium)
            .await;
        DiscoveryRequest {
            queued: true,
            estimated_calls: self.estimated_calls(series_id),
        }
    }

    /// Drop the series' cache entirely and rediscover at high priority
    pub async fn force_refresh(&self, series_id: &str, title: Option<&str>) {
        info!(series_id = %series_id, "Force refresh requested");
        self.store.remove_series(series_id).await;
        self.queue
            .enqueue(series_id, title, JobPriority::High)
            .await;
    }

    pub fn discovery_progress(&self, series_id: &str) -> DiscoveryProgress {
        let stats = self.store.series_stats(series_id);
        let discovered = stats.total_episodes;

        if self.store.is_valid(series_id) {
            return DiscoveryProgress {
                episodes_discovered: discovered,
                total_episodes: discovered,
                discovery_percentage: 100,
                estimated_remaining_calls: 0,
            };
        }

        let assumed = (self.config.assumed_seasons
            * self.config.assumed_episodes_per_season) as usize;
        let total = discovered.max(assumed);
        let percentage = if total == 0 {
            0
        } else {
            (discovered * 100 / total) as u32
        };

        DiscoveryProgress {
            episodes_discovered: discovered,
            total_episodes: total,
            discovery_percentage: percentage,
            estimated_remaining_calls: (total - discovered) as u32,
        }
    }

    pub fn service_stats(&self) -> ServiceStats {
        let counters = self.catalog.counters();
        let api_efficiency = if counters.lookups == 0 {
            0.0
        } else {
            counters.cache_hits as f64 / counters.lookups as f64
        };

        ServiceStats {
            cached_episodes: self.store.cached_episode_count(),
            queue_items: self.queue.len(),
            api_efficiency,
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn series_stats(&self, series_id: &str) -> SeriesStats {
        self.store.series_stats(series_id)
    }

    /// Subscribe to live probe progress
    pub fn probe_progress(&self) -> watch::Receiver<ProbeProgress> {
        self.progress_tx.subscribe()
    }

    fn prober(&self) -> EpisodeProber {
        let catalog: Arc<dyn CatalogApi> = self.catalog.clone();
        EpisodeProber::new(catalog, &self.config)
    }

    /// Rough cost of discovering what's still unknown about a series
    fn estimated_calls(&self, series_id: &str) -> u32 {
        let per_season = self.config.assumed_episodes_per_season
            + self.config.max_consecutive_failures;
        let remaining_seasons = self
            .config
            .assumed_seasons
            .saturating_sub(self.store.loaded_season_count(series_id));
        remaining_seasons * per_season
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::persist::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            min_request_spacing: Duration::from_millis(1),
            probe_delay: Duration::ZERO,
            inter_job_delay: Duration::from_millis(1),
            max_episodes_per_season: 10,
            ..DiscoveryConfig::default()
        }
    }

    /// Catalog fake: every (series, season) pair below the limits has a
    /// fixed number of episodes
    struct FakeCatalog {
        seasons: u32,
        episodes_per_season: u32,
        calls: AtomicU32,
    }

    impl FakeCatalog {
        fn new(seasons: u32, episodes_per_season: u32) -> Self {
            Self {
                seasons,
                episodes_per_season,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn fetch_episode(
            &self,
            series_id: &str,
            season: u32,
            episode: u32,
        ) -> Result<Episode, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if season <= self.seasons && episode <= self.episodes_per_season {
                Ok(Episode {
                    series_id: series_id.to_string(),
                    season,
                    episode,
                    title: Some(format!("S{season}E{episode}")),
                    ..Episode::default()
                })
            } else {
                Err(CatalogError::NotFound)
            }
        }
    }

    async fn service(catalog: Arc<dyn CatalogApi>) -> DiscoveryService {
        DiscoveryService::with_catalog(fast_config(), Arc::new(MemoryStore::new()), catalog)
            .await
    }

    #[tokio::test]
    async fn cache_miss_queues_background_discovery() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;

        assert_eq!(svc.get_episode("tt1", 1, 1, false).await, None);
        assert!(svc.queue_status().queue_length == 1);
        assert!(svc.queue.is_queued("tt1"));
    }

    #[tokio::test]
    async fn foreground_discovery_populates_cache() {
        let catalog = Arc::new(FakeCatalog::new(1, 3));
        let svc = service(catalog.clone()).await;

        let episodes = svc.discover_season("tt1", 1).await;
        assert_eq!(episodes.len(), 3);

        // Second call is pure cache, no new probes
        let before = catalog.calls.load(Ordering::SeqCst);
        let again = svc.discover_season("tt1", 1).await;
        assert_eq!(again.len(), 3);
        assert_eq!(catalog.calls.load(Ordering::SeqCst), before);

        // And the episode read path now hits
        assert!(svc.get_episode("tt1", 1, 2, false).await.is_some());
    }

    #[tokio::test]
    async fn nonexistent_season_yields_empty() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;
        assert!(svc.discover_season("tt1", 99).await.is_empty());
    }

    #[tokio::test]
    async fn discover_series_dedups_and_estimates() {
        let svc = service(Arc::new(FakeCatalog::new(2, 3))).await;

        let first = svc.discover_series("tt1", "Some Show").await;
        assert!(first.queued);
        // 5 assumed seasons x (10 assumed episodes + 3 failure probes)
        assert_eq!(first.estimated_calls, 65);

        let second = svc.discover_series("tt1", "Some Show").await;
        assert!(second.queued);
        assert_eq!(svc.queue_status().queue_length, 1);
    }

    #[tokio::test]
    async fn force_refresh_drops_cache_and_queues_high() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;

        svc.discover_season("tt1", 1).await;
        assert!(svc.store.is_valid("tt1"));

        assert_eq!(svc.get_episode("tt1", 1, 1, true).await, None);
        assert!(!svc.store.is_valid("tt1"));
        assert_eq!(
            svc.queue.pop().await.unwrap().priority,
            JobPriority::High
        );
    }

    #[tokio::test]
    async fn valid_cache_makes_discover_series_a_noop() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;
        svc.discover_season("tt1", 1).await;

        let request = svc.discover_series("tt1", "Some Show").await;
        assert!(!request.queued);
        assert_eq!(request.estimated_calls, 0);
        assert_eq!(svc.queue_status().queue_length, 0);
    }

    #[tokio::test]
    async fn progress_reports_complete_series_as_100() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;
        svc.discover_season("tt1", 1).await;

        let progress = svc.discovery_progress("tt1");
        assert_eq!(progress.episodes_discovered, 3);
        assert_eq!(progress.total_episodes, 3);
        assert_eq!(progress.discovery_percentage, 100);
        assert_eq!(progress.estimated_remaining_calls, 0);
    }

    #[tokio::test]
    async fn progress_uses_assumed_totals_while_discovering() {
        let svc = service(Arc::new(FakeCatalog::new(1, 3))).await;

        let progress = svc.discovery_progress("tt1");
        assert_eq!(progress.episodes_discovered, 0);
        assert_eq!(progress.total_episodes, 50);
        assert_eq!(progress.discovery_percentage, 0);
        assert_eq!(progress.estimated_remaining_calls, 50);
    }

    #[tokio::test]
    async fn service_stats_track_cache_efficiency() {
        let svc = service(Arc::new(FakeCatalog::new(1, 2))).await;
        svc.discover_season("tt1", 1).await;

        svc.get_episode("tt1", 1, 1, false).await;

        let stats = svc.service_stats();
        assert_eq!(stats.cached_episodes, 2);
        assert!(stats.api_efficiency >= 0.0 && stats.api_efficiency <= 1.0);
    }
}
