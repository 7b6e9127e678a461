//! Background job workers.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{AppError, QueuedJob};

use super::jobs::{FailureAction, JobContext, handle_job};

/// Maximum retry backoff in seconds
const MAX_BACKOFF_SECS: i64 = 256;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// Jobs claimed per poll
    pub batch_size: i64,
    /// Number of concurrent worker loops
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
            concurrency: 4,
        }
    }
}

/// Spawn `config.concurrency` workers sharing one shutdown channel.
///
/// Send `true` on the returned sender to stop them after their current batch.
pub fn spawn_worker_pool(
    ctx: JobContext,
    config: WorkerConfig,
) -> (Vec<JoinHandle<()>>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = (0..config.concurrency.max(1))
        .map(|worker_id| {
            let ctx = ctx.clone();
            let config = config.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { run_worker(worker_id, ctx, config, shutdown_rx).await })
        })
        .collect();
    (handles, shutdown_tx)
}

async fn run_worker(
    worker_id: usize,
    ctx: JobContext,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "Job worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let processed = match process_batch(&ctx, config.batch_size).await {
            Ok(n) => n,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to claim jobs");
                0
            }
        };

        // Drain without sleeping while there is work.
        if processed > 0 {
            continue;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
    info!(worker_id, "Job worker stopped");
}

/// Claim and run one batch. Returns the number of jobs claimed.
pub async fn process_batch(ctx: &JobContext, batch_size: i64) -> Result<usize, AppError> {
    let jobs = ctx.queue.claim(batch_size).await?;
    let count = jobs.len();
    for job in jobs {
        run_job(ctx, &job).await;
    }
    Ok(count)
}

async fn run_job(ctx: &JobContext, job: &QueuedJob) {
    let kind = job.job.kind();
    match handle_job(job, ctx).await {
        Ok(()) => {
            ctx.metrics.job_succeeded(kind);
            if let Err(e) = ctx.queue.complete(job.id).await {
                error!(job_id = %job.id, error = %e, "Failed to mark job complete");
            }
        }
        Err(e) => {
            let action = FailureAction::for_error(&e);
            let retry_at = match action {
                FailureAction::Retry if !job.is_last_attempt() => {
                    let backoff = calculate_backoff(job.attempts);
                    Some(Utc::now() + chrono::Duration::milliseconds(backoff.as_millis() as i64))
                }
                _ => None,
            };

            match retry_at {
                Some(at) => {
                    ctx.metrics.job_retried(kind);
                    warn!(job_id = %job.id, kind, attempt = job.attempts + 1, retry_at = %at, error = %e, "Job failed, retrying");
                }
                None if action == FailureAction::Retry => {
                    ctx.metrics.job_dropped(kind);
                    error!(job_id = %job.id, kind, attempts = job.attempts + 1, error = %e, "Job exhausted retries");
                }
                None => {
                    ctx.metrics.job_dropped(kind);
                    error!(job_id = %job.id, kind, error = %e, "Job dropped");
                }
            }

            if let Err(db_err) = ctx.queue.fail(job.id, &e.to_string(), retry_at).await {
                error!(job_id = %job.id, error = %db_err, "Failed to record job failure");
            }
        }
    }
    debug!(job_id = %job.id, kind, "Job finished");
}

/// Exponential backoff (2^attempt seconds, capped) with up to 25% jitter
pub fn calculate_backoff(attempt: i32) -> Duration {
    let base = 2_i64.pow(attempt.clamp(0, 8) as u32).min(MAX_BACKOFF_SECS);
    let base_ms = (base * 1000) as u64;
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
    Duration::from_millis(base_ms + jitter)
}
