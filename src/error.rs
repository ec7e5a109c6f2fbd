//! Error taxonomy for the discovery engine
//!
//! `NotFound` and `SeasonNotFound` are ordinary control flow for the prober
//! and worker; they never surface to consumers as failures. `RateLimited`
//! halts upstream traffic until the quota window resets. `Network` is the
//! only variant retried.

use thiserror::Error;

/// Errors produced by catalog lookups
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested episode does not exist upstream
    #[error("episode not found")]
    NotFound,

    /// Upstream quota exhausted, either sentinel-matched from the response
    /// body or pre-empted by the local daily budget
    #[error("catalog request limit reached")]
    RateLimited,

    /// Transient transport failure (connect, timeout, non-success status)
    #[error("network error: {0}")]
    Network(String),

    /// Body claimed success but could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors produced by a season probe
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Episode 1 of the season was absent, so the season itself is assumed
    /// not to exist
    #[error("season does not exist")]
    SeasonNotFound,

    /// Transport failure after the catalog client exhausted its retries
    #[error("network error: {0}")]
    Network(String),

    /// Probe aborted by a cancellation token
    #[error("probe cancelled")]
    Cancelled,
}
