//! Application layer containing business logic and shared state.

pub mod jobs;
pub mod metrics;
pub mod reconciliation;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod webhook;
pub mod worker;

pub use jobs::{FailureAction, JobContext, handle_job};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use reconciliation::ReconciliationService;
pub use registry::ProviderRegistry;
pub use scheduler::{SchedulerConfig, spawn_scheduler};
pub use service::{
    PaymentService, ServiceConfig, TransitionOutcome, api_key_hash, refund_total, refundable_balance,
};
pub use state::AppState;
pub use webhook::WebhookService;
pub use worker::{WorkerConfig, process_batch, spawn_worker_pool};
