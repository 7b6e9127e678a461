//! Application state management.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;

use crate::domain::{AuditLogger, CallbackClient, JobQueue, PaymentStore, Provider, UsageRecorder};

use super::jobs::JobContext;
use super::metrics::GatewayMetrics;
use super::reconciliation::ReconciliationService;
use super::registry::ProviderRegistry;
use super::service::{PaymentService, ServiceConfig};
use super::webhook::WebhookService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub webhooks: Arc<WebhookService>,
    pub store: Arc<dyn PaymentStore>,
    pub queue: Arc<dyn JobQueue>,
    pub providers: Arc<ProviderRegistry>,
    pub audit: Arc<dyn AuditLogger>,
    /// Counters for this instance, served at `/metrics`
    pub metrics: Arc<GatewayMetrics>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn JobQueue>,
        providers: ProviderRegistry,
        audit: Arc<dyn AuditLogger>,
        usage: Arc<dyn UsageRecorder>,
        config: ServiceConfig,
    ) -> Self {
        let providers = Arc::new(providers);
        let metrics = Arc::new(GatewayMetrics::new());
        let service = Arc::new(PaymentService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&providers),
            Arc::clone(&audit),
            usage,
            Arc::clone(&metrics),
            config,
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            Arc::clone(&service),
            Arc::clone(&store),
            Arc::clone(&providers),
            Arc::clone(&audit),
            Arc::clone(&metrics),
        ));
        let webhooks = Arc::new(WebhookService::new(
            Arc::clone(&service),
            Arc::clone(&store),
            Arc::clone(&providers),
            Arc::clone(&audit),
            Arc::clone(&metrics),
        ));
        Self {
            service,
            reconciliation,
            webhooks,
            store,
            queue,
            providers,
            audit,
            metrics,
        }
    }

    /// Install per-provider webhook secrets (builder pattern).
    /// Providers without a secret reject every webhook.
    #[must_use]
    pub fn with_webhook_secrets(mut self, secrets: HashMap<Provider, SecretString>) -> Self {
        let webhooks = secrets.into_iter().fold(
            WebhookService::new(
                Arc::clone(&self.service),
                Arc::clone(&self.store),
                Arc::clone(&self.providers),
                Arc::clone(&self.audit),
                Arc::clone(&self.metrics),
            ),
            |svc, (provider, secret)| svc.with_secret(provider, secret),
        );
        self.webhooks = Arc::new(webhooks);
        self
    }

    /// Dependencies for the job workers
    #[must_use]
    pub fn job_context(&self, callbacks: Arc<dyn CallbackClient>) -> JobContext {
        JobContext {
            service: Arc::clone(&self.service),
            reconciliation: Arc::clone(&self.reconciliation),
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            callbacks,
            metrics: Arc::clone(&self.metrics),
        }
    }
}
