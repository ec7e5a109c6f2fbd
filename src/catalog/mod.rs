//! Catalog API access: transport, budget-aware client, response cache

pub mod cache;
pub mod client;
pub mod omdb;

pub use client::{ApiCounters, CatalogClient, RetryConfig};
pub use omdb::OmdbTransport;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::model::Episode;

/// Single-episode lookup against the external catalog.
///
/// Implemented by the raw HTTP transport and by [`CatalogClient`], which
/// layers quota, throttling, caching, and retries on top of an inner
/// implementation. The prober and tests only ever see this trait.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_episode(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Episode, CatalogError>;
}
