//! The background worker: claims eligible copy jobs and pages through an
//! account's connections, persisting each page and rescheduling the job.

use crate::config;
use crate::db;
use crate::instagram::model::Connections;
use crate::instagram::{InstagramService, ProxyError};
use crate::model::{CopyJob, JobFrequency, JobType};
use anyhow::{Context, Result};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// How many pages of followers/following to consecutively fetch before
/// pausing the job.
const ATTEMPTS: usize = 4;

/// The scheduler's delay knobs, kept separate from the control flow so
/// tests can shrink them to zero.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Wait between scheduler iterations.
    pub tick: Duration,
    /// Pause between consecutive page fetches within one job run.
    pub attempt_pause: Duration,
    /// Randomized pause (minutes, inclusive) after a job finishes, on top
    /// of the tick.
    pub cooldown_minutes: [u64; 2],
    /// Randomized reschedule delay (minutes, inclusive) when the attempt
    /// budget runs out before the sync completes.
    pub retry_minutes: [u64; 2],
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            attempt_pause: Duration::from_secs(5),
            cooldown_minutes: [10, 15],
            retry_minutes: [20, 30],
        }
    }
}

impl Pacing {
    pub fn from_config(cfg: &config::Worker) -> Self {
        Self {
            tick: Duration::from_secs(cfg.tick_seconds),
            attempt_pause: Duration::from_secs(cfg.attempt_pause_seconds),
            cooldown_minutes: cfg.cooldown_minutes,
            retry_minutes: cfg.retry_minutes,
        }
    }
}

/// Uniform random duration within an inclusive range of minutes. The
/// jitter keeps retries from synchronizing against the proxy.
fn rand_minutes([min, max]: [u64; 2]) -> Duration {
    let minutes = rand::thread_rng().gen_range(min..=max);
    Duration::from_secs(minutes * 60)
}

/// Delay before the job's next run: a fixed period for a completed sync,
/// jittered backoff otherwise.
fn reschedule_delay(done: bool, frequency: JobFrequency, pacing: &Pacing) -> Duration {
    if !done {
        return rand_minutes(pacing.retry_minutes);
    }

    match frequency {
        JobFrequency::Daily => Duration::from_secs(24 * 60 * 60),
        JobFrequency::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
    }
}

/// Returns the next scheduled copy job that is ready for execution.
/// Followers jobs take priority over following jobs when both are eligible.
pub async fn next_copy_job(pool: &db::Pool) -> Result<Option<CopyJob>> {
    let job = match db::next_job(pool, JobType::CopyFollowers).await? {
        Some(job) => Some(job),
        None => db::next_job(pool, JobType::CopyFollowing).await?,
    };

    let Some(job) = job else {
        return Ok(None);
    };

    Ok(Some(CopyJob::new(job)?))
}

async fn fetch_page(
    instagram: &dyn InstagramService,
    job: &CopyJob,
    cursor: Option<&str>,
) -> Result<Connections, ProxyError> {
    match job.job.job_type {
        JobType::CopyFollowers => instagram.get_followers(job.metadata.user_id, cursor).await,
        JobType::CopyFollowing => instagram.get_following(job.metadata.user_id, cursor).await,
    }
}

// The audit trail is best-effort observability: log and move on.
async fn audit(pool: &db::Pool, job_id: i64, event: &str) {
    if let Err(err) = db::insert_job_event(pool, job_id, event).await {
        warn!(?err, job_id, "could not log job event");
    }
}

/// Executes one invocation of a copy job.
///
/// Fetches up to [`ATTEMPTS`] pages, persisting each page and its cursor
/// as it goes. A fetch failure marks the job `error` and aborts; it will
/// not be claimed again until an operator resets it. Afterwards the job is
/// rescheduled: one day/week out if the sync completed, 20–30 minutes out
/// if pages remain.
#[instrument(skip_all, fields(job.id = job.job.id))]
pub async fn run_copy_job(
    pool: &db::Pool,
    instagram: &dyn InstagramService,
    pacing: &Pacing,
    job: &CopyJob,
) -> Result<()> {
    audit(pool, job.job.id, "job picked up for execution").await;

    let mut cursor = job.metadata.cursor.clone();
    let mut done = false;

    for attempt in 0..ATTEMPTS {
        let page = match fetch_page(instagram, job, cursor.as_deref()).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(db_err) = db::mark_failed(pool, job.job.id, &err.to_string()).await {
                    error!(?db_err, job.id = job.job.id, "could not mark job as failed");
                }

                return Err(anyhow::Error::new(err).context("instaproxy fetch failed"));
            }
        };

        cursor = page.next.clone().filter(|c| !c.is_empty());

        db::store_copy_results(pool, job, &page)
            .await
            .context("could not store copy results")?;

        let summary = format!(
            "Copied {} users. Next cursor: {}",
            page.users.len(),
            cursor.as_deref().unwrap_or("none")
        );
        audit(pool, job.job.id, &summary).await;

        if cursor.is_none() {
            done = true;
            break;
        }

        if attempt + 1 < ATTEMPTS {
            tokio::time::sleep(pacing.attempt_pause).await;
        }
    }

    if done {
        audit(pool, job.job.id, "Sync completed").await;
    }

    let delay = reschedule_delay(done, job.metadata.frequency, pacing);
    db::schedule_job(pool, job.job.id, delay)
        .await
        .context("could not reschedule job")?;

    Ok(())
}

/// The scheduler loop: claims at most one eligible job per iteration and
/// runs it synchronously. Runner failures are logged and audited, never
/// fatal to the loop. Exits cleanly when `shutdown` flips; an in-flight
/// job is allowed to finish.
pub async fn run_scheduler(
    pool: &db::Pool,
    instagram: &dyn InstagramService,
    pacing: &Pacing,
    mut shutdown: watch::Receiver<bool>,
) {
    // Start the first iteration immediately.
    let mut delay = Duration::from_millis(1);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutting down worker...");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        // Wait one tick between each iteration, found a job or not.
        delay = pacing.tick;

        let job = match next_copy_job(pool).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(err) => {
                error!(?err, "could not fetch job");
                continue;
            }
        };

        if let Err(err) = db::touch_job(pool, job.job.id).await {
            error!(?err, job.id = job.job.id, job.label = %job.job.label, "could not update job timestamp");
            continue;
        }

        info!(
            job.id = job.job.id,
            job.label = %job.job.label,
            job.job_type = job.job.job_type.as_str(),
            "starting job"
        );

        if let Err(err) = run_copy_job(pool, instagram, pacing, &job).await {
            error!(?err, job.id = job.job.id, job.label = %job.job.label, "could not execute job");
            audit(pool, job.job.id, &err.to_string()).await;
        }

        // Extra pause after an executed job not to flood the proxy.
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutting down worker...");
                return;
            }
            _ = tokio::time::sleep(rand_minutes(pacing.cooldown_minutes)) => {}
        }
    }
}
