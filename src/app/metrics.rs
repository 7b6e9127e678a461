//! In-process counters owned by the application state.
//!
//! One instance is created per `AppState` and handed to every component that
//! reports, so tests get an isolated set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per job-type outcome counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct JobCounters {
    pub succeeded: u64,
    pub retried: u64,
    pub dropped: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MetricsSnapshot {
    pub payments_created: u64,
    pub idempotent_replays: u64,
    pub transitions_applied: u64,
    pub status_conflicts: u64,
    pub webhooks_accepted: u64,
    pub webhooks_rejected: u64,
    pub refunds_requested: u64,
    pub reconciliation_runs: u64,
    pub jobs: BTreeMap<String, JobCounters>,
}

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    payments_created: AtomicU64,
    idempotent_replays: AtomicU64,
    transitions_applied: AtomicU64,
    status_conflicts: AtomicU64,
    webhooks_accepted: AtomicU64,
    webhooks_rejected: AtomicU64,
    refunds_requested: AtomicU64,
    reconciliation_runs: AtomicU64,
    jobs: DashMap<&'static str, JobCounters>,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_created(&self) {
        self.payments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idempotent_replay(&self) {
        self.idempotent_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transition_applied(&self) {
        self.transitions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_conflict(&self) {
        self.status_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_accepted(&self) {
        self.webhooks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refund_requested(&self) {
        self.refunds_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconciliation_run(&self) {
        self.reconciliation_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self, kind: &'static str) {
        self.jobs.entry(kind).or_default().succeeded += 1;
    }

    pub fn job_retried(&self, kind: &'static str) {
        self.jobs.entry(kind).or_default().retried += 1;
    }

    pub fn job_dropped(&self, kind: &'static str) {
        self.jobs.entry(kind).or_default().dropped += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            payments_created: self.payments_created.load(Ordering::Relaxed),
            idempotent_replays: self.idempotent_replays.load(Ordering::Relaxed),
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            status_conflicts: self.status_conflicts.load(Ordering::Relaxed),
            webhooks_accepted: self.webhooks_accepted.load(Ordering::Relaxed),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::Relaxed),
            refunds_requested: self.refunds_requested.load(Ordering::Relaxed),
            reconciliation_runs: self.reconciliation_runs.load(Ordering::Relaxed),
            jobs: self
                .jobs
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }
}
