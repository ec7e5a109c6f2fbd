//! Background discovery worker
//!
//! A single loop owns queue draining: pop the head job, probe seasons
//! contiguously from 1, write each season into the cache store, stop the
//! series after a run of empty seasons. Seasons already cached in full are
//! skipped, so a retried job only probes what is still missing. Errors
//! never escape the loop: network failures requeue the job one priority
//! tier down, a rate limit aborts the rest of the pass so the quota window
//! can recover.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::ProbeError;
use crate::model::DiscoveryJob;
use crate::prober::{EpisodeProber, ProbeProgress};
use crate::queue::JobQueue;
use crate::store::CacheStore;

/// Why a job did not run to completion
enum JobFailure {
    RateLimited,
    Network(String),
    Cancelled,
}

pub(crate) struct WorkerContext {
    pub prober: EpisodeProber,
    pub store: Arc<CacheStore>,
    pub queue: Arc<JobQueue>,
    pub config: Arc<DiscoveryConfig>,
    pub progress: watch::Sender<ProbeProgress>,
    pub cancel: CancellationToken,
}

/// The worker loop. Spawned once by `DiscoveryService::start`; exits when
/// the cancellation token fires.
pub(crate) async fn run(ctx: WorkerContext) {
    info!("Discovery worker started");

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ctx.queue.wait_for_work() => {}
            _ = tokio::time::sleep(ctx.config.queue_poll_interval) => {}
        }

        drain_pass(&ctx).await;

        if ctx.cancel.is_cancelled() {
            break;
        }
    }

    info!("Discovery worker stopped");
}

/// Drain the backlog until it is empty or the pass has to stop
async fn drain_pass(ctx: &WorkerContext) {
    while let Some(job) = ctx.queue.pop().await {
        let outcome = process_job(ctx, &job).await;
        ctx.queue.finish_current().await;

        match outcome {
            Ok(()) => {}
            Err(JobFailure::Network(e)) => {
                let demoted = job.priority.demoted();
                warn!(
                    series_id = %job.series_id,
                    error = %e,
                    priority = ?demoted,
                    "Discovery job hit a network error, requeueing demoted"
                );
                ctx.queue.requeue(job, demoted).await;
            }
            Err(JobFailure::RateLimited) => {
                let priority = job.priority;
                warn!(
                    series_id = %job.series_id,
                    "Rate limited, aborting queue pass until quota recovers"
                );
                ctx.queue.requeue(job, priority).await;
                return;
            }
            Err(JobFailure::Cancelled) => {
                let priority = job.priority;
                ctx.queue.requeue(job, priority).await;
                return;
            }
        }

        // Pause between jobs; bail out promptly on shutdown
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.inter_job_delay) => {}
            _ = ctx.cancel.cancelled() => return,
        }
    }
}

/// Process one series job, keeping the fetch-in-progress flag accurate on
/// every exit path
async fn process_job(ctx: &WorkerContext, job: &DiscoveryJob) -> Result<(), JobFailure> {
    info!(
        series_id = %job.series_id,
        title = %job.series_title.as_deref().unwrap_or(&job.series_id),
        priority = ?job.priority,
        "Processing discovery job"
    );

    ctx.store.set_background_fetching(&job.series_id, true).await;
    let result = discover_all_seasons(ctx, job).await;
    ctx.store.set_background_fetching(&job.series_id, false).await;
    result
}

async fn discover_all_seasons(
    ctx: &WorkerContext,
    job: &DiscoveryJob,
) -> Result<(), JobFailure> {
    let mut consecutive_empty = 0u32;

    for season in 1..=ctx.config.max_seasons {
        if ctx.cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }

        // A season already discovered in full stays untouched; a job
        // requeued after a failure resumes at the first missing season
        if ctx.store.season_is_current(&job.series_id, season) {
            consecutive_empty = 0;
            continue;
        }

        match ctx
            .prober
            .discover_season(&job.series_id, season, &ctx.progress, &ctx.cancel)
            .await
        {
            Ok(probe) => {
                if probe.episodes.is_empty() {
                    consecutive_empty += 1;
                } else {
                    consecutive_empty = 0;
                    ctx.store
                        .insert_season(
                            &job.series_id,
                            season,
                            probe.episodes,
                            probe.fully_loaded,
                        )
                        .await;
                }

                if probe.rate_limited {
                    return Err(JobFailure::RateLimited);
                }
            }
            // Same early-stop philosophy as within a season, one level up
            Err(ProbeError::SeasonNotFound) => {
                consecutive_empty += 1;
            }
            Err(ProbeError::Network(e)) => return Err(JobFailure::Network(e)),
            Err(ProbeError::Cancelled) => return Err(JobFailure::Cancelled),
        }

        if consecutive_empty >= ctx.config.max_consecutive_empty_seasons {
            debug!(
                series_id = %job.series_id,
                last_probed = season,
                "Consecutive empty seasons, series assumed ended"
            );
            break;
        }
    }

    let stats = ctx.store.series_stats(&job.series_id);
    info!(
        series_id = %job.series_id,
        seasons = stats.total_seasons,
        episodes = stats.total_episodes,
        "Series discovery complete"
    );
    Ok(())
}
