//! Adaptive episode prober
//!
//! The catalog only answers single-episode lookups, so seasons of unknown
//! length are enumerated one probe at a time, strictly sequentially. A run
//! of consecutive misses is taken as the end of the season. This is a
//! heuristic trading completeness for quota: a season with a gap of
//! `max_consecutive_failures` genuinely-missing episodes will be truncated
//! at the gap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::CatalogApi;
use crate::config::DiscoveryConfig;
use crate::error::{CatalogError, ProbeError};
use crate::model::Episode;

/// Live probe status, published after every probe. Consumers subscribe to
/// the watch channel instead of passing callbacks in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeProgress {
    pub series_id: String,
    pub season: u32,
    pub found: u32,
    pub tried: u32,
}

impl ProbeProgress {
    fn new(series_id: &str, season: u32, found: u32, tried: u32) -> Self {
        Self {
            series_id: series_id.to_string(),
            season,
            found,
            tried,
        }
    }
}

/// Outcome of a season probe
#[derive(Debug)]
pub struct SeasonProbe {
    /// Episodes found, in strictly increasing episode-number order
    pub episodes: Vec<Episode>,
    /// Probes performed
    pub tried: u32,
    /// True when the probe ran to its natural stop condition; false when it
    /// was cut short by the upstream rate limit
    pub fully_loaded: bool,
    /// The upstream quota ran out mid-season
    pub rate_limited: bool,
}

/// Enumerates a season's episodes via the catalog client
pub struct EpisodeProber {
    catalog: Arc<dyn CatalogApi>,
    max_episodes: u32,
    max_consecutive_failures: u32,
    probe_delay: Duration,
    probe_timeout: Duration,
}

impl EpisodeProber {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: &DiscoveryConfig) -> Self {
        Self {
            catalog,
            max_episodes: config.max_episodes_per_season,
            max_consecutive_failures: config.max_consecutive_failures,
            probe_delay: config.probe_delay,
            probe_timeout: config.probe_timeout,
        }
    }

    /// Probe episodes 1..=max sequentially until the consecutive-failure
    /// threshold, the episode cap, the quota, or cancellation stops it.
    ///
    /// If episode 1 itself is absent the season is assumed not to exist and
    /// exactly one probe is spent on it.
    pub async fn discover_season(
        &self,
        series_id: &str,
        season: u32,
        progress: &watch::Sender<ProbeProgress>,
        cancel: &CancellationToken,
    ) -> Result<SeasonProbe, ProbeError> {
        info!(series_id = %series_id, season = season, "Probing season");

        let mut episodes: Vec<Episode> = Vec::new();
        let mut consecutive_failures = 0u32;
        let mut tried = 0u32;
        let mut rate_limited = false;
        let mut fully_loaded = true;

        for episode_num in 1..=self.max_episodes {
            if cancel.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }

            let result = tokio::time::timeout(
                self.probe_timeout,
                self.catalog.fetch_episode(series_id, season, episode_num),
            )
            .await
            .unwrap_or(Err(CatalogError::Network("probe timed out".to_string())));
            tried += 1;

            match result {
                Ok(episode) => {
                    debug!(
                        series_id = %series_id,
                        season = season,
                        episode = episode_num,
                        title = ?episode.title,
                        "Episode found"
                    );
                    episodes.push(episode);
                    consecutive_failures = 0;
                }
                Err(CatalogError::NotFound) | Err(CatalogError::Malformed(_)) => {
                    // Season that's missing its first episode almost
                    // certainly doesn't exist; don't waste quota on it
                    if episode_num == 1 {
                        progress.send_replace(ProbeProgress::new(series_id, season, 0, tried));
                        debug!(series_id = %series_id, season = season, "Season not found");
                        return Err(ProbeError::SeasonNotFound);
                    }
                    consecutive_failures += 1;
                    if consecutive_failures >= self.max_consecutive_failures {
                        progress.send_replace(ProbeProgress::new(
                            series_id,
                            season,
                            episodes.len() as u32,
                            tried,
                        ));
                        break;
                    }
                }
                Err(CatalogError::RateLimited) => {
                    warn!(
                        series_id = %series_id,
                        season = season,
                        found = episodes.len(),
                        "Rate limited mid-season, keeping partial results"
                    );
                    rate_limited = true;
                    fully_loaded = false;
                    progress.send_replace(ProbeProgress::new(
                        series_id,
                        season,
                        episodes.len() as u32,
                        tried,
                    ));
                    break;
                }
                Err(CatalogError::Network(e)) => {
                    return Err(ProbeError::Network(e));
                }
            }

            progress.send_replace(ProbeProgress::new(
                series_id,
                season,
                episodes.len() as u32,
                tried,
            ));

            // Politeness pause between probes, on top of the client throttle
            if episode_num < self.max_episodes && !self.probe_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.probe_delay) => {}
                    _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                }
            }
        }

        info!(
            series_id = %series_id,
            season = season,
            found = episodes.len(),
            tried = tried,
            fully_loaded = fully_loaded,
            "Season probe finished"
        );

        Ok(SeasonProbe {
            episodes,
            tried,
            fully_loaded,
            rate_limited,
        })
    }
}
