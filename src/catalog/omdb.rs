//! OMDb-style HTTP transport for single-episode lookups
//!
//! The upstream exposes no "list all episodes" endpoint; every lookup is one
//! `(series id, season, episode)` query. Success and failure both come back
//! as HTTP 200 with a `Response` field; the rate-limit condition is a
//! sentinel error string that must be matched exactly to distinguish it
//! from an ordinary miss.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::CatalogApi;
use crate::config::DiscoveryConfig;
use crate::error::CatalogError;
use crate::model::Episode;

/// Exact error string the upstream returns when the key's daily limit is hit
pub const RATE_LIMIT_SENTINEL: &str = "Request limit reached!";

/// Raw HTTP transport. No budgeting or caching here; that is the
/// [`CatalogClient`](super::CatalogClient)'s job.
pub struct OmdbTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Episode lookup response wire format
#[derive(Debug, Deserialize)]
struct WireEpisode {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Error")]
    error: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Released")]
    released: Option<String>,
    #[serde(rename = "Runtime")]
    runtime: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Writer")]
    writer: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
}

impl OmdbTransport {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl CatalogApi for OmdbTransport {
    async fn fetch_episode(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Episode, CatalogError> {
        debug!(
            series_id = %series_id,
            season = season,
            episode = episode,
            "Fetching episode from catalog"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("i", series_id),
                ("Season", &season.to_string()),
                ("Episode", &episode.to_string()),
                ("plot", "short"),
            ])
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::Network(format!(
                "catalog returned status {}",
                response.status()
            )));
        }

        let wire: WireEpisode = response
            .json()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;

        episode_from_wire(series_id, season, episode, wire)
    }
}

/// Map a decoded body onto the domain model, classifying failures
fn episode_from_wire(
    series_id: &str,
    season: u32,
    episode: u32,
    wire: WireEpisode,
) -> Result<Episode, CatalogError> {
    if !wire.response.eq_ignore_ascii_case("true") {
        return match wire.error.as_deref() {
            Some(RATE_LIMIT_SENTINEL) => Err(CatalogError::RateLimited),
            _ => Err(CatalogError::NotFound),
        };
    }

    Ok(Episode {
        series_id: series_id.to_string(),
        season,
        episode,
        external_id: normalize(wire.imdb_id),
        title: normalize(wire.title),
        plot: normalize(wire.plot),
        air_date: normalize(wire.released),
        runtime: normalize(wire.runtime),
        rating: normalize(wire.imdb_rating).and_then(|r| r.parse().ok()),
        poster_url: normalize(wire.poster),
        director: normalize(wire.director),
        writer: normalize(wire.writer),
        actors: normalize(wire.actors),
    })
}

/// The upstream encodes missing fields as the literal string "N/A"
fn normalize(field: Option<String>) -> Option<String> {
    field.filter(|v| v != "N/A" && !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode(body: &str) -> WireEpisode {
        serde_json::from_str(body).expect("test body decodes")
    }

    #[test]
    fn successful_body_maps_to_episode() {
        let wire = decode(
            r#"{
                "Title": "Pilot",
                "Released": "2008-01-20",
                "Runtime": "58 min",
                "Plot": "A chemistry teacher starts cooking.",
                "Director": "Vince Gilligan",
                "Writer": "Vince Gilligan",
                "Actors": "Bryan Cranston, Anna Gunn",
                "Poster": "https://example.com/p.jpg",
                "imdbRating": "8.9",
                "imdbID": "tt0959621",
                "Response": "True"
            }"#,
        );

        let ep = episode_from_wire("tt0903747", 1, 1, wire).unwrap();
        assert_eq!(ep.series_id, "tt0903747");
        assert_eq!(ep.title.as_deref(), Some("Pilot"));
        assert_eq!(ep.rating, Some(8.9));
        assert_eq!(ep.external_id.as_deref(), Some("tt0959621"));
    }

    #[test]
    fn na_fields_normalize_to_none() {
        let wire = decode(
            r#"{
                "Title": "Untitled",
                "Released": "N/A",
                "Runtime": "N/A",
                "Plot": "N/A",
                "Director": "N/A",
                "Writer": "N/A",
                "Actors": "N/A",
                "Poster": "N/A",
                "imdbRating": "N/A",
                "imdbID": "tt0000001",
                "Response": "True"
            }"#,
        );

        let ep = episode_from_wire("tt1", 2, 3, wire).unwrap();
        assert_eq!(ep.air_date, None);
        assert_eq!(ep.rating, None);
        assert_eq!(ep.plot, None);
        assert_eq!(ep.title.as_deref(), Some("Untitled"));
    }

    #[test]
    fn missing_episode_is_not_found() {
        let wire = decode(r#"{"Response": "False", "Error": "Episode not found!"}"#);
        assert_matches!(
            episode_from_wire("tt1", 1, 99, wire),
            Err(CatalogError::NotFound)
        );
    }

    #[test]
    fn sentinel_is_rate_limited_only_on_exact_match() {
        let wire = decode(r#"{"Response": "False", "Error": "Request limit reached!"}"#);
        assert_matches!(
            episode_from_wire("tt1", 1, 1, wire),
            Err(CatalogError::RateLimited)
        );

        // Near-miss strings are ordinary misses, not rate limits
        let wire = decode(r#"{"Response": "False", "Error": "request limit reached"}"#);
        assert_matches!(
            episode_from_wire("tt1", 1, 1, wire),
            Err(CatalogError::NotFound)
        );
    }
}
