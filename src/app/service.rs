//! Payment lifecycle service: the only write path for payment status.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, AuditLogger, Consumer, CreatePaymentRequest, DatabaseError, GatewayOutcome,
    HealthResponse, HealthStatus, InitiateRequest, Job, JobQueue, ListPaymentsParams,
    PaginatedResponse, Payment, PaymentFilter, PaymentStatus, PaymentStore, ProviderError,
    ProviderStatus, RefundInsert, RefundRequest, StatusChange, Transaction, TransactionType,
    UsageRecorder, ValidationError, refund_status,
};

use super::metrics::GatewayMetrics;
use super::registry::ProviderRegistry;

/// Attempts at a guarded transition before giving up on a contended payment
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Hex SHA-256 digest under which a consumer's API key is stored
#[must_use]
pub fn api_key_hash(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Sum of the refund entries in `ledger` whose status is one of `statuses`
#[must_use]
pub fn refund_total(ledger: &[Transaction], statuses: &[&str]) -> Decimal {
    ledger
        .iter()
        .filter(|t| {
            t.transaction_type == TransactionType::Refund && statuses.contains(&t.status.as_str())
        })
        .map(|t| t.amount)
        .sum()
}

/// Amount still refundable once `committed` is spoken for
#[must_use]
pub fn refundable_balance(amount: Decimal, committed: Decimal) -> Decimal {
    (amount - committed).max(Decimal::ZERO)
}

/// Lifecycle settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Fixed currency of every payment
    pub currency: String,
    /// Time a payment may wait for the provider before it expires
    pub payment_ttl: Duration,
    /// Delay before the polling fallback checks a pending payment
    pub status_check_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            currency: "ZMW".to_string(),
            payment_ttl: Duration::minutes(30),
            status_check_delay: Duration::seconds(60),
        }
    }
}

/// Result of a status report routed through the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The payment moved to the reported status
    Applied(Payment),
    /// The payment was already at the reported status
    Duplicate(Payment),
    /// The report contradicts a resolved payment and was only audited
    Conflict(Payment),
}

impl TransitionOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Applied(p) | Self::Duplicate(p) | Self::Conflict(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Self::Applied(p) | Self::Duplicate(p) | Self::Conflict(p) => p,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Application service containing the payment state machine
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn JobQueue>,
    providers: Arc<ProviderRegistry>,
    audit: Arc<dyn AuditLogger>,
    usage: Arc<dyn UsageRecorder>,
    metrics: Arc<GatewayMetrics>,
    config: ServiceConfig,
}

impl PaymentService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn JobQueue>,
        providers: Arc<ProviderRegistry>,
        audit: Arc<dyn AuditLogger>,
        usage: Arc<dyn UsageRecorder>,
        metrics: Arc<GatewayMetrics>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            queue,
            providers,
            audit,
            usage,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Resolve the consumer owning an API key
    #[instrument(skip_all)]
    pub async fn authenticate(&self, api_key: &str) -> Result<Consumer, AppError> {
        self.store
            .find_consumer_by_key_hash(&api_key_hash(api_key))
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid API key".to_string()))
    }

    /// Create a payment and queue its initiation.
    ///
    /// A repeated `(consumer, idempotency_key)` returns the stored payment untouched.
    #[instrument(skip(self, request), fields(provider = %request.provider, amount = %request.amount))]
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
        consumer_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<Payment, AppError> {
        let idempotency_key = idempotency_key
            .or(request.idempotency_key.as_deref())
            .map(str::to_string);

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_by_idempotency_key(consumer_id, key).await? {
                info!(payment_id = %existing.id, "Idempotent replay of payment creation");
                self.metrics.idempotent_replay();
                return Ok(existing);
            }
        }

        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        if !self.providers.contains(request.provider) {
            return Err(AppError::Validation(ValidationError::invalid(
                "provider",
                format!("Provider {} is not available", request.provider),
            )));
        }

        let payment = Payment::new(
            consumer_id,
            request,
            idempotency_key.clone(),
            &self.config.currency,
            self.config.payment_ttl,
        );

        let payment = match self.store.insert_payment(&payment).await {
            Ok(payment) => payment,
            Err(AppError::Database(DatabaseError::Duplicate(_))) if idempotency_key.is_some() => {
                // Lost a race on the same key: the winner's record is the answer.
                let key = idempotency_key.as_deref().unwrap_or_default();
                let winner = self
                    .store
                    .find_by_idempotency_key(consumer_id, key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Duplicate key reported but no payment found".into())
                    })?;
                info!(payment_id = %winner.id, "Concurrent duplicate create resolved to existing payment");
                self.metrics.idempotent_replay();
                return Ok(winner);
            }
            Err(e) => return Err(e),
        };

        self.metrics.payment_created();
        info!(payment_id = %payment.id, "Payment created");

        if let Err(e) = self.usage.record(consumer_id, 1, payment.amount).await {
            warn!(payment_id = %payment.id, error = %e, "Failed to record usage");
        }
        self.audit(
            "payment.created",
            &payment,
            json!({
                "amount": payment.amount,
                "provider": payment.provider,
                "external_reference": payment.external_reference,
            }),
        )
        .await;

        if let Err(e) = self
            .queue
            .enqueue(Job::InitiatePayment {
                payment_id: payment.id,
            })
            .await
        {
            // The payment stays CREATED and expires on its next access.
            error!(payment_id = %payment.id, error = %e, "Failed to enqueue initiation");
        }

        Ok(payment)
    }

    /// Drive a CREATED payment through the provider's initiation call.
    ///
    /// Any other status is a no-op, so duplicate job deliveries are harmless.
    #[instrument(skip(self))]
    pub async fn initiate_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self.load(payment_id).await?;

        if payment.status != PaymentStatus::Created {
            debug!(status = %payment.status, "Payment already past CREATED, skipping initiation");
            return Ok(payment);
        }

        if payment.is_expired_at(Utc::now()) {
            return Ok(self.expire(payment).await?.into_payment());
        }

        let Some(payment) = self
            .try_transition(&payment, PaymentStatus::Initiated, None, None, json!({}))
            .await?
        else {
            debug!("Another worker claimed the initiation");
            return self.load(payment_id).await;
        };

        let result = match self.providers.get(payment.provider) {
            Ok(provider) => {
                provider
                    .initiate(&InitiateRequest {
                        amount: payment.amount,
                        currency: payment.currency.clone(),
                        phone_number: payment.phone_number.clone(),
                        reference: payment.id.to_string(),
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(GatewayOutcome::Success(provider_reference)) => {
                info!(provider_reference = %provider_reference, "Provider accepted initiation");
                let transaction = Transaction::new(
                    payment.id,
                    TransactionType::Payment,
                    payment.amount,
                    PaymentStatus::Pending.as_str(),
                )
                .with_provider_transaction_id(Some(provider_reference.clone()))
                .with_payload(json!({ "provider_reference": provider_reference }));

                let updated = self
                    .try_transition(
                        &payment,
                        PaymentStatus::Pending,
                        Some(provider_reference.clone()),
                        Some(transaction.clone()),
                        json!({ "provider_reference": provider_reference }),
                    )
                    .await?;

                let payment = match updated {
                    Some(p) => p,
                    None => {
                        // A status report overtook the provider's answer. The status it
                        // set stands, but the reference is still needed to refund and settle.
                        match self
                            .store
                            .attach_provider_reference(payment_id, &provider_reference, &transaction)
                            .await?
                        {
                            Some(p) => {
                                info!(
                                    provider_reference = %provider_reference,
                                    status = %p.status,
                                    "Provider reference recorded after concurrent status change"
                                );
                                self.audit(
                                    "payment.provider_reference_recorded",
                                    &p,
                                    json!({ "provider_reference": provider_reference }),
                                )
                                .await;
                                p
                            }
                            None => {
                                warn!(provider_reference = %provider_reference, "Payment moved while initiating");
                                self.load(payment_id).await?
                            }
                        }
                    }
                };

                if payment.status == PaymentStatus::Pending {
                    let run_at = (Utc::now() + self.config.status_check_delay).min(payment.expires_at);
                    if let Err(e) = self
                        .queue
                        .enqueue_at(Job::PaymentStatusCheck { payment_id }, run_at)
                        .await
                    {
                        warn!(error = %e, "Failed to schedule status check");
                    }
                }
                Ok(payment)
            }
            Ok(GatewayOutcome::Failure(reason) | GatewayOutcome::Indeterminate(reason)) => {
                self.fail_initiation(&payment, &reason).await
            }
            Err(e) => {
                error!(error = %e, "Unexpected error during initiation");
                self.fail_initiation(&payment, &e.to_string()).await
            }
        }
    }

    async fn fail_initiation(&self, payment: &Payment, reason: &str) -> Result<Payment, AppError> {
        warn!(payment_id = %payment.id, reason = %reason, "Initiation failed");
        self.audit(
            "payment.initiation_failed",
            payment,
            json!({ "error": reason }),
        )
        .await;

        let transaction = Transaction::new(
            payment.id,
            TransactionType::Payment,
            payment.amount,
            PaymentStatus::Failed.as_str(),
        )
        .with_payload(json!({ "error": reason }))
        .processed_now();

        match self
            .try_transition(
                payment,
                PaymentStatus::Failed,
                None,
                Some(transaction),
                json!({ "error": reason }),
            )
            .await?
        {
            Some(p) => Ok(p),
            None => self.load(payment.id).await,
        }
    }

    /// The single authoritative status transition.
    ///
    /// A report equal to the current status is a duplicate. A report that would move a
    /// resolved payment anywhere the transition table forbids is recorded as a
    /// discrepancy and not applied: the first resolved status wins.
    #[instrument(skip(self, metadata))]
    pub async fn update_payment_status(
        &self,
        payment_id: Uuid,
        new_status: PaymentStatus,
        provider_transaction_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<TransitionOutcome, AppError> {
        let metadata = metadata.unwrap_or_else(|| json!({}));

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let payment = self.load(payment_id).await?;

            if payment.status == new_status {
                debug!(status = %new_status, "Duplicate status report");
                return Ok(TransitionOutcome::Duplicate(payment));
            }

            if !payment.status.can_transition_to(new_status) {
                warn!(
                    current = %payment.status,
                    reported = %new_status,
                    "Conflicting status report recorded as discrepancy"
                );
                self.metrics.status_conflict();
                self.audit(
                    "payment.status_discrepancy",
                    &payment,
                    json!({
                        "current_status": payment.status,
                        "reported_status": new_status,
                        "amount": payment.amount,
                        "provider_transaction_id": provider_transaction_id,
                        "metadata": metadata,
                    }),
                )
                .await;
                return Ok(TransitionOutcome::Conflict(payment));
            }

            let transaction_type = match new_status {
                PaymentStatus::Settled => TransactionType::Settlement,
                _ => TransactionType::Payment,
            };
            let transaction = Transaction::new(
                payment.id,
                transaction_type,
                payment.amount,
                new_status.as_str(),
            )
            .with_provider_transaction_id(provider_transaction_id.clone())
            .with_payload(metadata.clone())
            .processed_now();

            if let Some(updated) = self
                .try_transition(&payment, new_status, None, Some(transaction), metadata.clone())
                .await?
            {
                return Ok(TransitionOutcome::Applied(updated));
            }
            debug!("Lost transition race, re-evaluating");
        }

        Err(AppError::Conflict(format!(
            "Payment {} is being updated concurrently",
            payment_id
        )))
    }

    /// Request a refund of a COMPLETED or SETTLED payment.
    ///
    /// The provider call happens in the `process-refund` job.
    #[instrument(skip(self, request))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        request: &RefundRequest,
        consumer_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, AppError> {
        let payment = self.get_payment(consumer_id, payment_id).await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.store.find_refund_by_idempotency_key(payment.id, key).await? {
                info!(refund_id = %existing.id, "Idempotent replay of refund request");
                self.metrics.idempotent_replay();
                return Ok(existing);
            }
        }

        request.validate().map_err(|e| {
            warn!(error = %e, "Refund validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        if !payment.status.is_refundable() {
            return Err(AppError::Conflict(format!(
                "Payment is {}; only COMPLETED or SETTLED payments can be refunded",
                payment.status
            )));
        }

        let amount = request.amount.unwrap_or(payment.amount);
        if amount > payment.amount {
            return Err(AppError::Conflict(format!(
                "Refund amount {} exceeds payment amount {}",
                amount, payment.amount
            )));
        }

        let refund = Transaction::new(
            payment.id,
            TransactionType::Refund,
            amount,
            refund_status::PENDING,
        )
        .with_payload(json!({
            "idempotency_key": idempotency_key,
            "reason": request.reason,
            "requested_by": consumer_id,
        }));

        let refund = match self.store.insert_refund_within_balance(&refund).await {
            Ok(RefundInsert::Inserted(refund)) => refund,
            Ok(RefundInsert::ExceedsBalance { committed }) => {
                return Err(AppError::Conflict(format!(
                    "Refund amount {} exceeds refundable balance {}",
                    amount,
                    refundable_balance(payment.amount, committed)
                )));
            }
            Err(AppError::Database(DatabaseError::Duplicate(_))) if idempotency_key.is_some() => {
                let key = idempotency_key.unwrap_or_default();
                return self
                    .store
                    .find_refund_by_idempotency_key(payment.id, key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Duplicate key reported but no refund found".into())
                    });
            }
            Err(e) => return Err(e),
        };

        self.metrics.refund_requested();
        info!(refund_id = %refund.id, amount = %amount, "Refund requested");
        self.audit(
            "refund.requested",
            &payment,
            json!({
                "refund_id": refund.id,
                "amount": amount,
                "reason": request.reason,
            }),
        )
        .await;

        self.queue
            .enqueue(Job::ProcessRefund {
                payment_id: payment.id,
                refund_transaction_id: refund.id,
            })
            .await?;

        Ok(refund)
    }

    /// Execute a pending refund against the provider. Non-pending refunds are ignored.
    #[instrument(skip(self))]
    pub async fn process_refund(
        &self,
        payment_id: Uuid,
        refund_transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let refund = self
            .store
            .get_transaction(refund_transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(refund_transaction_id.to_string()))
            })?;

        if refund.status != refund_status::PENDING {
            debug!(status = %refund.status, "Refund already processed");
            return Ok(());
        }

        let payment = self.load(payment_id).await?;

        if !payment.status.is_refundable() {
            return self
                .reject_refund(&payment, &refund, &format!("payment is {}", payment.status))
                .await;
        }
        let Some(provider_reference) = payment.provider_reference.clone() else {
            return self
                .reject_refund(&payment, &refund, "payment has no provider reference")
                .await;
        };

        let provider = self.providers.get(payment.provider)?;
        let refund_reference = refund.id.to_string();
        match provider
            .refund(&provider_reference, &refund_reference, refund.amount, &payment.currency)
            .await
        {
            Ok(GatewayOutcome::Success(refund_reference)) => {
                if !self
                    .store
                    .resolve_refund(refund.id, refund_status::COMPLETED, Some(&refund_reference))
                    .await?
                {
                    return Ok(());
                }
                info!(refund_id = %refund.id, refund_reference = %refund_reference, "Refund completed");
                self.audit(
                    "refund.completed",
                    &payment,
                    json!({
                        "refund_id": refund.id,
                        "refund_reference": refund_reference,
                        "amount": refund.amount,
                    }),
                )
                .await;

                let refunded = refund_total(
                    &self.store.list_transactions(payment.id).await?,
                    &[refund_status::COMPLETED],
                );
                if refunded < payment.amount {
                    info!(
                        refunded = %refunded,
                        remaining = %refundable_balance(payment.amount, refunded),
                        "Partial refund completed, payment stays refundable"
                    );
                    return Ok(());
                }

                let metadata = json!({ "source": "refund", "refund_id": refund.id, "refunded": refunded });
                let mut payment = payment;
                for _ in 0..MAX_TRANSITION_ATTEMPTS {
                    if !payment.status.can_transition_to(PaymentStatus::Refunded) {
                        break;
                    }
                    if self
                        .try_transition(&payment, PaymentStatus::Refunded, None, None, metadata.clone())
                        .await?
                        .is_some()
                    {
                        break;
                    }
                    payment = self.load(payment_id).await?;
                }
                Ok(())
            }
            Ok(GatewayOutcome::Failure(reason)) => self.reject_refund(&payment, &refund, &reason).await,
            Ok(GatewayOutcome::Indeterminate(reason)) => {
                // The money may have moved. The refund stays pending and keeps its share
                // of the balance until a retry under the same reference settles it.
                warn!(refund_id = %refund.id, reason = %reason, "Refund outcome unknown, will retry");
                Err(ProviderError::Unavailable(reason).into())
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => self.reject_refund(&payment, &refund, &e.to_string()).await,
        }
    }

    async fn reject_refund(
        &self,
        payment: &Payment,
        refund: &Transaction,
        reason: &str,
    ) -> Result<(), AppError> {
        if self
            .store
            .resolve_refund(refund.id, refund_status::FAILED, None)
            .await?
        {
            warn!(refund_id = %refund.id, reason = %reason, "Refund failed");
            self.audit(
                "refund.failed",
                payment,
                json!({ "refund_id": refund.id, "error": reason }),
            )
            .await;
        }
        Ok(())
    }

    /// Poll the provider for a payment still waiting on it, expiring it when overdue.
    #[instrument(skip(self))]
    pub async fn check_payment_status(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self.load(payment_id).await?;

        if payment.is_expired_at(Utc::now()) {
            return Ok(self.expire(payment).await?.into_payment());
        }
        if !payment.status.is_awaiting_provider() {
            return Ok(payment);
        }
        let Some(reference) = payment.provider_reference.clone() else {
            return Ok(payment);
        };

        let provider = self.providers.get(payment.provider)?;
        match provider.check_status(&reference).await? {
            GatewayOutcome::Success(ProviderStatus::NotFound) => {
                warn!(provider_reference = %reference, "Provider does not know this payment");
                Ok(payment)
            }
            GatewayOutcome::Success(status) => {
                let Some(target) = status.as_payment_status() else {
                    return Ok(payment);
                };
                if target == PaymentStatus::Pending {
                    return Ok(payment);
                }
                let outcome = self
                    .update_payment_status(
                        payment.id,
                        target,
                        None,
                        Some(json!({ "source": "poll", "provider_status": status })),
                    )
                    .await?;
                Ok(outcome.into_payment())
            }
            GatewayOutcome::Failure(reason) | GatewayOutcome::Indeterminate(reason) => {
                warn!(reason = %reason, "Status poll failed");
                Ok(payment)
            }
        }
    }

    async fn expire(&self, payment: Payment) -> Result<TransitionOutcome, AppError> {
        info!(payment_id = %payment.id, "Payment expired before the provider resolved it");
        self.update_payment_status(
            payment.id,
            PaymentStatus::Expired,
            None,
            Some(json!({ "source": "expiry", "expires_at": payment.expires_at })),
        )
        .await
    }

    /// Get a payment owned by `consumer_id`, applying expiry on access
    #[instrument(skip(self))]
    pub async fn get_payment(&self, consumer_id: Uuid, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .filter(|p| p.consumer_id == consumer_id)
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", payment_id)))?;

        if payment.is_expired_at(Utc::now()) {
            return Ok(self.expire(payment).await?.into_payment());
        }
        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        consumer_id: Uuid,
        params: &ListPaymentsParams,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        params.validate().map_err(|e| {
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        let filter = PaymentFilter {
            consumer_id,
            status: params.status,
            from: params.from,
            to: params.to,
        };
        self.store
            .list_payments(&filter, params.limit, params.cursor)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        consumer_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<Transaction>, AppError> {
        let payment = self.get_payment(consumer_id, payment_id).await?;
        self.store.list_transactions(payment.id).await
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };

        let mut healthy = 0;
        for adapter in self.providers.adapters() {
            match adapter.health_check().await {
                Ok(()) => healthy += 1,
                Err(e) => warn!(provider = %adapter.provider(), error = %e, "Provider unhealthy"),
            }
        }
        let provider_health = if healthy == self.providers.len() {
            HealthStatus::Healthy
        } else if healthy > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthResponse::new(db_health, provider_health)
    }

    async fn load(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))
    }

    /// Guarded write from `payment.status` to `to`, with its side effects.
    ///
    /// Returns `None` when another writer got there first.
    async fn try_transition(
        &self,
        payment: &Payment,
        to: PaymentStatus,
        provider_reference: Option<String>,
        transaction: Option<Transaction>,
        metadata: serde_json::Value,
    ) -> Result<Option<Payment>, AppError> {
        let change = StatusChange {
            payment_id: payment.id,
            from: payment.status,
            to,
            provider_reference,
            transaction,
        };
        let Some(updated) = self.store.transition(&change).await? else {
            return Ok(None);
        };

        self.metrics.transition_applied();
        info!(payment_id = %updated.id, from = %payment.status, to = %to, "Payment status changed");
        self.audit(
            "payment.status_changed",
            &updated,
            json!({ "from": payment.status, "to": to, "metadata": metadata }),
        )
        .await;

        if matches!(to, PaymentStatus::Completed | PaymentStatus::Failed)
            && updated.callback_url.is_some()
        {
            if let Err(e) = self
                .queue
                .enqueue(Job::SendCallback {
                    payment_id: updated.id,
                    status: to,
                })
                .await
            {
                error!(payment_id = %updated.id, error = %e, "Failed to enqueue callback");
            }
        }

        Ok(Some(updated))
    }

    async fn audit(&self, action: &str, payment: &Payment, metadata: serde_json::Value) {
        let id = payment.id.to_string();
        if let Err(e) = self.audit.log(action, "payment", Some(&id), metadata).await {
            warn!(action = %action, payment_id = %payment.id, error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Provider;
    use crate::test_utils::{MockReply, TestHarness};
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        let request = CreatePaymentRequest::new(dec!(1000), Provider::Mtn, "260971234567");
        Payment::new(Uuid::now_v7(), &request, None, "ZMW", Duration::minutes(30))
    }

    fn refund(payment_id: Uuid, amount: Decimal, status: &str) -> Transaction {
        Transaction::new(payment_id, TransactionType::Refund, amount, status)
    }

    #[test]
    fn test_api_key_hash_is_stable_hex() {
        let hash = api_key_hash("mmg_live_key");
        assert_eq!(hash, api_key_hash("mmg_live_key"));
        assert_ne!(hash, api_key_hash("mmg_other_key"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_refund_total_counts_only_matching_refunds() {
        let id = Uuid::now_v7();
        let ledger = vec![
            Transaction::new(id, TransactionType::Payment, dec!(1000), "COMPLETED"),
            refund(id, dec!(100), refund_status::COMPLETED),
            refund(id, dec!(200), refund_status::PENDING),
            refund(id, dec!(300), refund_status::FAILED),
        ];

        assert_eq!(
            refund_total(&ledger, &[refund_status::PENDING, refund_status::COMPLETED]),
            dec!(300)
        );
        assert_eq!(refund_total(&ledger, &[refund_status::COMPLETED]), dec!(100));
        assert_eq!(refund_total(&ledger, &[refund_status::FAILED]), dec!(300));
        assert_eq!(refund_total(&[], &[refund_status::COMPLETED]), Decimal::ZERO);
    }

    #[test]
    fn test_refundable_balance() {
        assert_eq!(refundable_balance(dec!(1000), dec!(0)), dec!(1000));
        assert_eq!(refundable_balance(dec!(1000), dec!(300)), dec!(700));
        assert_eq!(refundable_balance(dec!(1000), dec!(1000)), Decimal::ZERO);
        assert_eq!(refundable_balance(dec!(1000), dec!(1200)), Decimal::ZERO);
    }

    #[test]
    fn test_transition_outcome_accessors() {
        let p = payment();
        let applied = TransitionOutcome::Applied(p.clone());
        assert!(applied.is_applied());
        assert_eq!(applied.payment().id, p.id);

        for outcome in [
            TransitionOutcome::Duplicate(p.clone()),
            TransitionOutcome::Conflict(p.clone()),
        ] {
            assert!(!outcome.is_applied());
            assert_eq!(outcome.into_payment(), p);
        }
    }

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.currency, "ZMW");
        assert_eq!(config.payment_ttl, Duration::minutes(30));
        assert!(config.status_check_delay < config.payment_ttl);
    }

    async fn completed(h: &TestHarness, amount: Decimal) -> Payment {
        let payment = h.create_pending_payment(amount, Provider::Mtn).await.unwrap();
        h.state
            .service
            .update_payment_status(payment.id, PaymentStatus::Completed, None, None)
            .await
            .unwrap()
            .into_payment()
    }

    fn refund_request(amount: Decimal) -> RefundRequest {
        RefundRequest {
            amount: Some(amount),
            reason: "Customer cancelled".to_string(),
        }
    }

    #[tokio::test]
    async fn test_partial_refund_keeps_payment_refundable() {
        let h = TestHarness::new();
        let payment = completed(&h, dec!(1000)).await;
        let service = &h.state.service;

        let refund = service
            .refund_payment(payment.id, &refund_request(dec!(400)), h.consumer.id, None)
            .await
            .unwrap();
        service.process_refund(payment.id, refund.id).await.unwrap();

        assert_eq!(h.store.payment(payment.id).unwrap().status, PaymentStatus::Completed);
        let stored = h.store.transactions_for(payment.id);
        assert_eq!(refund_total(&stored, &[refund_status::COMPLETED]), dec!(400));

        // Already completed, so the provider is not called again.
        service.process_refund(payment.id, refund.id).await.unwrap();
        assert_eq!(h.mtn.refund_calls(), 1);
    }

    #[tokio::test]
    async fn test_refund_over_remaining_balance_reports_it() {
        let h = TestHarness::new();
        let payment = completed(&h, dec!(1000)).await;
        let service = &h.state.service;

        service
            .refund_payment(payment.id, &refund_request(dec!(600)), h.consumer.id, None)
            .await
            .unwrap();
        let err = service
            .refund_payment(payment.id, &refund_request(dec!(500)), h.consumer.id, None)
            .await
            .unwrap_err();

        let AppError::Conflict(message) = err else {
            panic!("expected conflict, got {err:?}");
        };
        assert!(message.contains("400"));
    }

    #[tokio::test]
    async fn test_unknown_refund_outcome_is_retryable_and_stays_pending() {
        let h = TestHarness::new();
        let payment = completed(&h, dec!(250)).await;
        h.mtn
            .push_refund(MockReply::Indeterminate("MTN returned HTTP 503".to_string()));

        let refund = h
            .state
            .service
            .refund_payment(payment.id, &refund_request(dec!(250)), h.consumer.id, None)
            .await
            .unwrap();
        let err = h
            .state
            .service
            .process_refund(payment.id, refund.id)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        let stored = h.store.transactions_for(payment.id);
        let pending = stored.iter().find(|t| t.id == refund.id).unwrap();
        assert_eq!(pending.status, refund_status::PENDING);
        assert_eq!(h.store.payment(payment.id).unwrap().status, PaymentStatus::Completed);
    }
}
