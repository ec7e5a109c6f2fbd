//! Season/series cache store
//!
//! Holds discovered episodes keyed by (series, season) with TTL-based
//! validity. All mutation happens through the worker loop or the service's
//! synchronous entry points; the parking_lot mutex is held only for the
//! in-memory update, never across an await. Every mutation is followed by a
//! JSON snapshot into the injected [`KeyValueStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::model::{Episode, SeasonCacheEntry, SeriesCacheEntry};
use crate::persist::KeyValueStore;

/// Snapshot key for the series map
pub const SERIES_CACHE_KEY: &str = "series_cache";

/// Aggregate series state for consumers
#[derive(Debug, Clone, Serialize)]
pub struct SeriesStats {
    pub cached: bool,
    pub total_seasons: u32,
    pub total_episodes: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_being_fetched: bool,
}

pub struct CacheStore {
    state: Mutex<HashMap<String, SeriesCacheEntry>>,
    cache_duration: Duration,
    persist: Arc<dyn KeyValueStore>,
}

impl CacheStore {
    /// Restore the series map from its snapshot. A corrupt snapshot is
    /// logged and discarded rather than failing startup.
    pub async fn restore(
        persist: Arc<dyn KeyValueStore>,
        config: &DiscoveryConfig,
    ) -> Self {
        let state = match persist.get(SERIES_CACHE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(map) => {
                    let map: HashMap<String, SeriesCacheEntry> = map;
                    info!(series = map.len(), "Restored series cache snapshot");
                    map
                }
                Err(e) => {
                    warn!(error = %e, "Series cache snapshot is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load series cache snapshot, starting empty");
                HashMap::new()
            }
        };

        Self {
            state: Mutex::new(state),
            cache_duration: config.cache_duration,
            persist,
        }
    }

    /// Episodes for a season, only when the entry exists, is fully loaded,
    /// and is within its cache duration.
    pub fn get_season(&self, series_id: &str, season: u32) -> Option<Vec<Episode>> {
        let now = Utc::now();
        let state = self.state.lock();
        let entry = state.get(series_id)?.seasons.get(&season)?;
        if entry.fully_loaded && entry.is_fresh(self.cache_duration, now) {
            Some(entry.episodes.clone())
        } else {
            None
        }
    }

    /// One episode from a valid season entry
    pub fn get_episode(&self, series_id: &str, season: u32, episode: u32) -> Option<Episode> {
        self.get_season(series_id, season)?
            .into_iter()
            .find(|e| e.episode == episode)
    }

    /// True only if the series has at least one season entry and every
    /// season is fully loaded and unexpired. A rate-limit partial keeps
    /// the series invalid so rediscovery can be queued right away.
    pub fn is_valid(&self, series_id: &str) -> bool {
        let now = Utc::now();
        let state = self.state.lock();
        match state.get(series_id) {
            Some(entry) if !entry.seasons.is_empty() => entry
                .seasons
                .values()
                .all(|s| s.fully_loaded && s.is_fresh(self.cache_duration, now)),
            _ => false,
        }
    }

    /// Whether one season's entry is fully loaded and unexpired
    pub fn season_is_current(&self, series_id: &str, season: u32) -> bool {
        let now = Utc::now();
        let state = self.state.lock();
        state
            .get(series_id)
            .and_then(|e| e.seasons.get(&season))
            .is_some_and(|s| s.fully_loaded && s.is_fresh(self.cache_duration, now))
    }

    /// Replace a season's entry wholesale. `total_seasons` rises to the
    /// highest season number that yielded episodes.
    pub async fn insert_season(
        &self,
        series_id: &str,
        season: u32,
        episodes: Vec<Episode>,
        fully_loaded: bool,
    ) {
        let now = Utc::now();
        {
            let mut state = self.state.lock();
            let entry = state
                .entry(series_id.to_string())
                .or_insert_with(|| SeriesCacheEntry::new(now));
            let found = episodes.len();
            entry
                .seasons
                .insert(season, SeasonCacheEntry::new(episodes, fully_loaded, now));
            if found > 0 {
                entry.total_seasons = entry.total_seasons.max(season);
            }
            entry.last_updated = now;
            debug!(
                series_id = %series_id,
                season = season,
                episodes = found,
                fully_loaded = fully_loaded,
                "Season cache entry replaced"
            );
        }
        self.persist_snapshot().await;
    }

    /// Drop a series entirely (used by force refresh)
    pub async fn remove_series(&self, series_id: &str) {
        let removed = self.state.lock().remove(series_id).is_some();
        if removed {
            info!(series_id = %series_id, "Series cache entry removed");
            self.persist_snapshot().await;
        }
    }

    pub async fn set_background_fetching(&self, series_id: &str, fetching: bool) {
        let now = Utc::now();
        {
            let mut state = self.state.lock();
            let entry = state
                .entry(series_id.to_string())
                .or_insert_with(|| SeriesCacheEntry::new(now));
            entry.is_background_fetching = fetching;
        }
        self.persist_snapshot().await;
    }

    pub fn series_stats(&self, series_id: &str) -> SeriesStats {
        let state = self.state.lock();
        match state.get(series_id) {
            Some(entry) => SeriesStats {
                cached: !entry.seasons.is_empty(),
                total_seasons: entry.total_seasons,
                total_episodes: entry.episode_count(),
                last_updated: Some(entry.last_updated),
                is_being_fetched: entry.is_background_fetching,
            },
            None => SeriesStats {
                cached: false,
                total_seasons: 0,
                total_episodes: 0,
                last_updated: None,
                is_being_fetched: false,
            },
        }
    }

    /// Fully-loaded season count for a series, for call estimates
    pub fn loaded_season_count(&self, series_id: &str) -> u32 {
        let state = self.state.lock();
        state
            .get(series_id)
            .map(|e| e.seasons.values().filter(|s| s.fully_loaded).count() as u32)
            .unwrap_or(0)
    }

    /// Total episodes cached across all series
    pub fn cached_episode_count(&self) -> usize {
        let state = self.state.lock();
        state.values().map(|e| e.episode_count()).sum()
    }

    async fn persist_snapshot(&self) {
        let snapshot: HashMap<String, SeriesCacheEntry> = self.state.lock().clone();
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.persist.set(SERIES_CACHE_KEY, value).await {
                    warn!(error = %e, "Failed to persist series cache snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode series cache snapshot"),
        }
    }
}
