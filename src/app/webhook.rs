//! Provider webhook ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, AuditLogger, Payment, PaymentStore, Provider, WebhookOutcome, WebhookPayload,
};
use crate::infra::signing::verify_signature;

use super::metrics::GatewayMetrics;
use super::registry::ProviderRegistry;
use super::service::{PaymentService, TransitionOutcome};

/// Verifies, maps and applies provider status pushes
pub struct WebhookService {
    service: Arc<PaymentService>,
    store: Arc<dyn PaymentStore>,
    providers: Arc<ProviderRegistry>,
    audit: Arc<dyn AuditLogger>,
    metrics: Arc<GatewayMetrics>,
    secrets: HashMap<Provider, SecretString>,
}

impl WebhookService {
    #[must_use]
    pub fn new(
        service: Arc<PaymentService>,
        store: Arc<dyn PaymentStore>,
        providers: Arc<ProviderRegistry>,
        audit: Arc<dyn AuditLogger>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            service,
            store,
            providers,
            audit,
            metrics,
            secrets: HashMap::new(),
        }
    }

    /// Register the shared secret for one provider (builder pattern)
    #[must_use]
    pub fn with_secret(mut self, provider: Provider, secret: SecretString) -> Self {
        self.secrets.insert(provider, secret);
        self
    }

    /// Ingest one webhook delivery.
    ///
    /// Only an absent or invalid signature is an error. Anything that goes wrong after
    /// the signature is accepted is audited and reported as [`WebhookOutcome::Ignored`]
    /// so the provider does not keep redelivering.
    #[instrument(skip(self, body, signature), fields(provider = %provider, body_len = body.len()))]
    pub async fn ingest(
        &self,
        provider: Provider,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let verified = match (self.secrets.get(&provider), signature) {
            (Some(secret), Some(sig)) => verify_signature(secret, body, sig),
            _ => false,
        };
        if !verified {
            let reason = if signature.is_none() {
                "missing signature"
            } else if !self.secrets.contains_key(&provider) {
                "no webhook secret configured"
            } else {
                "signature mismatch"
            };
            warn!(reason = %reason, "Webhook rejected");
            self.metrics.webhook_rejected();
            self.audit_webhook(
                "webhook.rejected",
                None,
                json!({ "provider": provider, "reason": reason }),
            )
            .await;
            return Err(AppError::InvalidSignature(format!(
                "Webhook signature rejected: {}",
                reason
            )));
        }
        self.metrics.webhook_accepted();

        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(e) => {
                return Ok(self
                    .ignore(provider, None, format!("malformed payload: {}", e), json!({}))
                    .await);
            }
        };

        let raw = serde_json::from_slice::<serde_json::Value>(body).unwrap_or_default();

        let mapped = match self.providers.get(provider) {
            Ok(adapter) => adapter.map_status(&payload.status),
            Err(e) => return Ok(self.ignore(provider, None, e.to_string(), raw).await),
        };
        let Some(new_status) = mapped.as_payment_status() else {
            let reason = format!("unmapped status {}", payload.status);
            return Ok(self.ignore(provider, None, reason, raw).await);
        };

        let payment = match self.resolve_payment(provider, &payload).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                let reason = format!("unknown payment reference {}", payload.payment_reference);
                return Ok(self.ignore(provider, None, reason, raw).await);
            }
            Err(e) => return Ok(self.ignore(provider, None, e.to_string(), raw).await),
        };

        let metadata = json!({
            "source": "webhook",
            "provider": provider,
            "provider_status": payload.status,
            "payload": raw,
        });
        let outcome = match self
            .service
            .update_payment_status(
                payment.id,
                new_status,
                Some(payload.provider_transaction_id.clone()),
                Some(metadata),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return Ok(self
                    .ignore(provider, Some(payment.id), e.to_string(), raw)
                    .await);
            }
        };

        let outcome = match outcome {
            TransitionOutcome::Applied(_) => WebhookOutcome::Applied,
            TransitionOutcome::Duplicate(_) => WebhookOutcome::Duplicate,
            TransitionOutcome::Conflict(_) => WebhookOutcome::Conflict,
        };
        info!(payment_id = %payment.id, status = %new_status, outcome = ?outcome, "Webhook processed");
        self.audit_webhook(
            "webhook.processed",
            Some(payment.id),
            json!({
                "provider": provider,
                "provider_transaction_id": payload.provider_transaction_id,
                "provider_status": payload.status,
                "outcome": outcome,
            }),
        )
        .await;
        Ok(outcome)
    }

    /// The reference may be our payment id or the provider's own reference
    async fn resolve_payment(
        &self,
        provider: Provider,
        payload: &WebhookPayload,
    ) -> Result<Option<Payment>, AppError> {
        let reference = payload.payment_reference.trim();
        let payment = match Uuid::parse_str(reference) {
            Ok(id) => self.store.get_payment(id).await?,
            Err(_) => None,
        };
        let payment = match payment {
            Some(p) => Some(p),
            None => {
                self.store
                    .find_by_provider_reference(provider, reference)
                    .await?
            }
        };
        Ok(payment.filter(|p| p.provider == provider))
    }

    async fn ignore(
        &self,
        provider: Provider,
        payment_id: Option<Uuid>,
        reason: String,
        payload: serde_json::Value,
    ) -> WebhookOutcome {
        warn!(reason = %reason, "Webhook accepted but not applied");
        self.audit_webhook(
            "webhook.failed",
            payment_id,
            json!({ "provider": provider, "error": reason, "payload": payload }),
        )
        .await;
        WebhookOutcome::Ignored
    }

    async fn audit_webhook(&self, action: &str, payment_id: Option<Uuid>, metadata: serde_json::Value) {
        let id = payment_id.map(|id| id.to_string());
        if let Err(e) = self
            .audit
            .log(action, "webhook", id.as_deref(), metadata)
            .await
        {
            warn!(action = %action, error = %e, "Failed to write audit entry");
        }
    }
}
