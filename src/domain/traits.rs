//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::AppError;
use super::jobs::{Job, QueuedJob};
use super::types::{
    CallbackPayload, Consumer, PaginatedResponse, Payment, PaymentFilter, PaymentStatus, Provider,
    ProviderStatus, Transaction,
};

/// A guarded status change: applied only while the row is still in `from`.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub payment_id: Uuid,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    /// Stored only if the payment has none yet
    pub provider_reference: Option<String>,
    /// Ledger entry appended in the same unit of work
    pub transaction: Option<Transaction>,
}

/// Result of appending a refund against a payment's refundable balance
#[derive(Debug, Clone, PartialEq)]
pub enum RefundInsert {
    Inserted(Transaction),
    /// Pending and completed refunds already hold `committed`; nothing was written
    ExceedsBalance { committed: Decimal },
}

/// Persistence for payments, their ledger and consumers
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a new payment.
    ///
    /// Fails with `DatabaseError::Duplicate` when `(consumer_id, idempotency_key)` already exists.
    async fn insert_payment(&self, payment: &Payment) -> Result<Payment, AppError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn find_by_idempotency_key(
        &self,
        consumer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Payment>, AppError>;

    async fn find_by_provider_reference(
        &self,
        provider: Provider,
        provider_reference: &str,
    ) -> Result<Option<Payment>, AppError>;

    /// List payments with cursor-based pagination, newest first
    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Payment>, AppError>;

    /// COMPLETED payments last updated within `[start, end)`
    async fn list_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        after: Option<Uuid>,
    ) -> Result<Vec<Payment>, AppError>;

    /// Apply a check-then-set status change.
    ///
    /// Returns `None` when the payment was no longer in `change.from`; nothing is written then.
    async fn transition(&self, change: &StatusChange) -> Result<Option<Payment>, AppError>;

    /// Store a provider reference on a payment that has none and append `transaction`
    /// in the same unit of work. The status is left alone.
    ///
    /// Returns `None` when a reference is already stored; nothing is written then.
    async fn attach_provider_reference(
        &self,
        payment_id: Uuid,
        provider_reference: &str,
        transaction: &Transaction,
    ) -> Result<Option<Payment>, AppError>;

    /// Append a ledger entry.
    ///
    /// Refund entries with an idempotency key already used on the same payment
    /// fail with `DatabaseError::Duplicate`.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, AppError>;

    /// Append a pending refund unless pending and completed refunds plus this one
    /// would exceed the payment amount.
    ///
    /// The check and the insert are serialized per payment. Key reuse fails with
    /// `DatabaseError::Duplicate`.
    async fn insert_refund_within_balance(&self, refund: &Transaction) -> Result<RefundInsert, AppError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError>;

    /// Ledger entries for a payment, oldest first
    async fn list_transactions(&self, payment_id: Uuid) -> Result<Vec<Transaction>, AppError>;

    async fn find_refund_by_idempotency_key(
        &self,
        payment_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError>;

    /// Move a refund entry out of `pending`. Returns `false` if it was not pending.
    async fn resolve_refund(
        &self,
        transaction_id: Uuid,
        status: &str,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool, AppError>;

    /// Look up a consumer by the SHA-256 hex digest of its API key
    async fn find_consumer_by_key_hash(&self, key_hash: &str) -> Result<Option<Consumer>, AppError>;
}

/// Durable work queue with at-least-once delivery
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), AppError>;

    /// Enqueue a job that becomes visible at `run_at`
    async fn enqueue_at(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), AppError>;

    /// Claim up to `limit` due jobs. Claimed jobs are invisible to other workers.
    async fn claim(&self, limit: i64) -> Result<Vec<QueuedJob>, AppError>;

    async fn complete(&self, job_id: Uuid) -> Result<(), AppError>;

    /// Record a failed attempt; retry at `retry_at`, or bury the job when `None`
    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>;
}

/// What a provider call produced when it did not raise an unexpected error
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome<T> {
    Success(T),
    /// The provider answered and declined
    Failure(String),
    /// Timeout, unreachable host or 5xx: the provider may or may not have acted
    Indeterminate(String),
}

impl<T> GatewayOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayOutcome::Success(_))
    }

    /// Reason of a non-successful outcome
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            GatewayOutcome::Success(_) => None,
            GatewayOutcome::Failure(reason) | GatewayOutcome::Indeterminate(reason) => Some(reason),
        }
    }
}

/// Parameters for a collection request
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    /// Gateway-side reference sent to the provider (the payment id)
    pub reference: String,
}

/// Uniform interface over one mobile network operator.
///
/// Adapters translate provider vocabularies into [`ProviderStatus`]; raw provider
/// shapes never leave the adapter.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Check provider connectivity (token endpoint reachable)
    async fn health_check(&self) -> Result<(), AppError>;

    /// Request a debit from the customer's wallet. Returns the provider reference.
    async fn initiate(&self, request: &InitiateRequest) -> Result<GatewayOutcome<String>, AppError>;

    async fn check_status(&self, provider_reference: &str) -> Result<GatewayOutcome<ProviderStatus>, AppError>;

    /// Refund a completed collection. Returns the provider's refund reference.
    ///
    /// `refund_reference` is stable across retries of the same refund; providers that
    /// accept a client reference use it to reject duplicates.
    async fn refund(
        &self,
        provider_reference: &str,
        refund_reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayOutcome<String>, AppError>;

    /// Translate a status string pushed by this provider's webhooks
    fn map_status(&self, raw: &str) -> ProviderStatus;
}

/// Outbound delivery to a consumer's callback URL
#[async_trait]
pub trait CallbackClient: Send + Sync {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), AppError>;
}

/// Audit trail collaborator
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(
        &self,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<(), AppError>;
}

/// Usage-billing collaborator
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, consumer_id: Uuid, calls: u64, volume: Decimal) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_outcome_is_success() {
        assert!(GatewayOutcome::Success("ref".to_string()).is_success());
        assert!(!GatewayOutcome::<String>::Failure("declined".to_string()).is_success());
    }

    #[test]
    fn test_failure_reason_covers_both_unsuccessful_outcomes() {
        assert_eq!(GatewayOutcome::Success(1).failure_reason(), None);
        assert_eq!(
            GatewayOutcome::<u8>::Failure("declined".into()).failure_reason(),
            Some("declined")
        );
        assert_eq!(
            GatewayOutcome::<u8>::Indeterminate("timed out".into()).failure_reason(),
            Some("timed out")
        );
    }
}
