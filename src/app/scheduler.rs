//! Daily reconciliation scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::{Job, JobQueue};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Earliest UTC hour at which yesterday's run is enqueued
    pub reconciliation_hour_utc: u32,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconciliation_hour_utc: 2,
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Day to reconcile at `now`, if a run is due and not yet enqueued today
pub fn due_reconciliation(
    now: DateTime<Utc>,
    hour_utc: u32,
    last_enqueued_on: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let today = now.date_naive();
    if now.hour() < hour_utc || last_enqueued_on == Some(today) {
        return None;
    }
    today.checked_sub_days(Days::new(1))
}

/// Spawn the scheduler loop. Send `true` to stop it.
pub fn spawn_scheduler(
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(hour_utc = config.reconciliation_hour_utc, "Reconciliation scheduler started");
        let mut last_enqueued_on: Option<NaiveDate> = None;
        let mut ticker = tokio::time::interval(config.tick_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let Some(date) = due_reconciliation(now, config.reconciliation_hour_utc, last_enqueued_on) else {
                        continue;
                    };
                    match queue.enqueue(Job::DailyReconciliation { date }).await {
                        Ok(()) => {
                            info!(%date, "Daily reconciliation enqueued");
                            last_enqueued_on = Some(now.date_naive());
                        }
                        Err(e) => error!(%date, error = %e, "Failed to enqueue daily reconciliation"),
                    }
                }
            }
        }
        info!("Reconciliation scheduler stopped");
    });

    (handle, shutdown_tx)
}
