//! episodarr: episode discovery and caching engine
//!
//! Populates per-season episode metadata for TV series from an external
//! catalog that only answers single-episode lookups and meters requests
//! against a daily quota. The engine probes seasons adaptively with a
//! stop-early heuristic, drains a persisted priority backlog from a single
//! background worker, and serves consumers from a TTL-based cache so the
//! read path never waits on the upstream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use episodarr::{DiscoveryConfig, DiscoveryService, JsonFileStore};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = DiscoveryConfig::from_env()?;
//! let persist = Arc::new(JsonFileStore::new("./data/state")?);
//! let service = DiscoveryService::new(config, persist).await;
//! service.start();
//!
//! let episodes = service.discover_season("tt0903747", 1).await;
//! println!("found {} episodes", episodes.len());
//!
//! service.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod persist;
pub mod prober;
pub mod queue;
pub mod service;
pub mod store;
mod worker;

pub use catalog::{ApiCounters, CatalogApi, CatalogClient, OmdbTransport, RetryConfig};
pub use config::DiscoveryConfig;
pub use error::{CatalogError, ProbeError};
pub use model::{DiscoveryJob, Episode, JobPriority, SeasonCacheEntry, SeriesCacheEntry};
pub use persist::{JsonFileStore, KeyValueStore, MemoryStore};
pub use prober::{EpisodeProber, ProbeProgress, SeasonProbe};
pub use queue::{JobQueue, QueueStatus};
pub use service::{DiscoveryProgress, DiscoveryRequest, DiscoveryService, ServiceStats};
pub use store::{CacheStore, SeriesStats};
