//! Cache and queue data model
//!
//! Everything here is serde-serializable because the series map and the
//! pending-job backlog are persisted as JSON snapshots after every mutation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single discovered episode. Immutable once fetched; a re-fetch replaces
/// the whole value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub series_id: String,
    pub season: u32,
    pub episode: u32,
    /// External catalog id (e.g. an IMDb id)
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub plot: Option<String>,
    pub air_date: Option<String>,
    pub runtime: Option<String>,
    pub rating: Option<f64>,
    pub poster_url: Option<String>,
    pub director: Option<String>,
    pub writer: Option<String>,
    pub actors: Option<String>,
}

/// One season's worth of discovered episodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonCacheEntry {
    /// Ordered by episode number; the prober only ever appends in order
    pub episodes: Vec<Episode>,
    pub fetched_at: DateTime<Utc>,
    /// False when discovery was cut short (rate limit), in which case the
    /// entry is retained but never served from `get_season`
    pub fully_loaded: bool,
    pub episode_count: usize,
}

impl SeasonCacheEntry {
    pub fn new(episodes: Vec<Episode>, fully_loaded: bool, now: DateTime<Utc>) -> Self {
        Self {
            episode_count: episodes.len(),
            episodes,
            fetched_at: now,
            fully_loaded,
        }
    }

    /// Whether the entry is still within its cache duration
    pub fn is_fresh(&self, cache_duration: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        match chrono::Duration::from_std(cache_duration) {
            Ok(ttl) => age < ttl,
            // Duration too large for chrono means it can never expire
            Err(_) => true,
        }
    }
}

/// Per-series cache state: season map plus aggregate metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesCacheEntry {
    pub seasons: BTreeMap<u32, SeasonCacheEntry>,
    /// Highest season number confirmed to contain episodes
    pub total_seasons: u32,
    pub last_updated: DateTime<Utc>,
    pub is_background_fetching: bool,
}

impl SeriesCacheEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            seasons: BTreeMap::new(),
            total_seasons: 0,
            last_updated: now,
            is_background_fetching: false,
        }
    }

    /// Total episodes across all seasons, partial entries included
    pub fn episode_count(&self) -> usize {
        self.seasons.values().map(|s| s.episode_count).sum()
    }
}

/// Priority tiers for discovery jobs. Ordering matters: higher variants are
/// serviced first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl JobPriority {
    /// One tier down, saturating at `Low`. Used when a job fails with a
    /// transient error and is requeued.
    pub fn demoted(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

/// A pending "discover this series" request. The title is display-only
/// and absent when the job came from a bare episode lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub series_id: String,
    pub series_title: Option<String>,
    pub priority: JobPriority,
    pub enqueued_at: DateTime<Utc>,
}
