//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::app::{api_key_hash, refund_total};
use crate::domain::{
    AppError, AuditLogger, CallbackClient, CallbackPayload, Consumer, DatabaseError,
    ExternalServiceError, GatewayOutcome, InitiateRequest, Job, JobQueue, PaginatedResponse,
    Payment, PaymentFilter, PaymentProvider, PaymentStatus, PaymentStore, Provider, ProviderError,
    ProviderStatus, QueuedJob, RefundInsert, StatusChange, Transaction, TransactionType,
    UsageRecorder, ValidationError, refund_status,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory payment store with the same guarded-transition semantics as Postgres
pub struct MockPaymentStore {
    payments: Arc<Mutex<HashMap<Uuid, Payment>>>,
    transactions: Arc<Mutex<Vec<Transaction>>>,
    consumers: Arc<Mutex<HashMap<String, Consumer>>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockPaymentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            payments: Arc::new(Mutex::new(HashMap::new())),
            transactions: Arc::new(Mutex::new(Vec::new())),
            consumers: Arc::new(Mutex::new(HashMap::new())),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Register a consumer authenticated by `api_key`
    pub fn add_consumer(&self, name: &str, api_key: &str) -> Consumer {
        let consumer = Consumer {
            id: Uuid::now_v7(),
            name: name.to_string(),
        };
        self.consumers
            .lock()
            .unwrap()
            .insert(api_key_hash(api_key), consumer.clone());
        consumer
    }

    /// Store a payment as-is, bypassing the lifecycle (for seeding tests)
    pub fn put_payment(&self, payment: Payment) {
        self.payments.lock().unwrap().insert(payment.id, payment);
    }

    /// Rewrite a stored payment in place (for backdating expiry in tests)
    pub fn update_payment(&self, id: Uuid, f: impl FnOnce(&mut Payment)) {
        if let Some(payment) = self.payments.lock().unwrap().get_mut(&id) {
            f(payment);
        }
    }

    /// Get a stored payment (for testing)
    pub fn payment(&self, id: Uuid) -> Option<Payment> {
        self.payments.lock().unwrap().get(&id).cloned()
    }

    /// Get all stored payments (for testing)
    pub fn all_payments(&self) -> Vec<Payment> {
        self.payments.lock().unwrap().values().cloned().collect()
    }

    /// Ledger entries of a payment in insertion order (for testing)
    pub fn transactions_for(&self, payment_id: Uuid) -> Vec<Transaction> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    fn push_transaction(
        transactions: &mut Vec<Transaction>,
        transaction: &Transaction,
    ) -> Result<(), AppError> {
        if transaction.transaction_type == TransactionType::Refund {
            if let Some(key) = transaction.idempotency_key() {
                let taken = transactions.iter().any(|t| {
                    t.payment_id == transaction.payment_id
                        && t.transaction_type == TransactionType::Refund
                        && t.idempotency_key() == Some(key)
                });
                if taken {
                    return Err(AppError::Database(DatabaseError::Duplicate(
                        "transactions_refund_idempotency_key".to_string(),
                    )));
                }
            }
        }
        transactions.push(transaction.clone());
        Ok(())
    }
}

impl Default for MockPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for MockPaymentStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<Payment, AppError> {
        self.check_should_fail()?;
        let mut payments = self.payments.lock().unwrap();
        if let Some(key) = payment.idempotency_key.as_deref() {
            let taken = payments.values().any(|p| {
                p.consumer_id == payment.consumer_id && p.idempotency_key.as_deref() == Some(key)
            });
            if taken {
                return Err(AppError::Database(DatabaseError::Duplicate(
                    "payments_consumer_idempotency_key".to_string(),
                )));
            }
        }
        payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        Ok(self.payments.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        consumer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        let payments = self.payments.lock().unwrap();
        Ok(payments
            .values()
            .find(|p| {
                p.consumer_id == consumer_id
                    && p.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .cloned())
    }

    async fn find_by_provider_reference(
        &self,
        provider: Provider,
        provider_reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        let payments = self.payments.lock().unwrap();
        Ok(payments
            .values()
            .find(|p| {
                p.provider == provider && p.provider_reference.as_deref() == Some(provider_reference)
            })
            .cloned())
    }

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        self.check_should_fail()?;
        let payments = self.payments.lock().unwrap();
        let mut items: Vec<Payment> = payments
            .values()
            .filter(|p| p.consumer_id == filter.consumer_id)
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| filter.from.is_none_or(|from| p.created_at >= from))
            .filter(|p| filter.to.is_none_or(|to| p.created_at < to))
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let items = match cursor {
            Some(cursor_id) => match payments
                .get(&cursor_id)
                .filter(|p| p.consumer_id == filter.consumer_id)
            {
                Some(anchor) => items
                    .into_iter()
                    .filter(|p| (p.created_at, p.id) < (anchor.created_at, anchor.id))
                    .collect(),
                None => {
                    return Err(AppError::Validation(ValidationError::invalid(
                        "cursor",
                        "Invalid cursor",
                    )));
                }
            },
            None => items,
        };

        let limit = limit.clamp(1, 100) as usize;
        let has_more = items.len() > limit;
        let items: Vec<Payment> = items.into_iter().take(limit).collect();
        let next_cursor = if has_more {
            items.last().map(|p| p.id)
        } else {
            None
        };
        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    async fn list_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        after: Option<Uuid>,
    ) -> Result<Vec<Payment>, AppError> {
        self.check_should_fail()?;
        let payments = self.payments.lock().unwrap();
        let mut items: Vec<Payment> = payments
            .values()
            .filter(|p| p.status == PaymentStatus::Completed)
            .filter(|p| p.updated_at >= start && p.updated_at < end)
            .filter(|p| after.is_none_or(|a| p.id > a))
            .cloned()
            .collect();
        items.sort_by_key(|p| p.id);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn transition(&self, change: &StatusChange) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        let mut payments = self.payments.lock().unwrap();
        let Some(payment) = payments.get_mut(&change.payment_id) else {
            return Ok(None);
        };
        if payment.status != change.from {
            return Ok(None);
        }
        if let Some(transaction) = &change.transaction {
            let mut transactions = self.transactions.lock().unwrap();
            Self::push_transaction(&mut transactions, transaction)?;
        }
        payment.status = change.to;
        if payment.provider_reference.is_none() {
            payment.provider_reference = change.provider_reference.clone();
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn attach_provider_reference(
        &self,
        payment_id: Uuid,
        provider_reference: &str,
        transaction: &Transaction,
    ) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        let mut payments = self.payments.lock().unwrap();
        let Some(payment) = payments.get_mut(&payment_id) else {
            return Ok(None);
        };
        if payment.provider_reference.is_some() {
            return Ok(None);
        }
        let mut transactions = self.transactions.lock().unwrap();
        Self::push_transaction(&mut transactions, transaction)?;
        payment.provider_reference = Some(provider_reference.to_string());
        Ok(Some(payment.clone()))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, AppError> {
        self.check_should_fail()?;
        let mut transactions = self.transactions.lock().unwrap();
        Self::push_transaction(&mut transactions, transaction)?;
        Ok(transaction.clone())
    }

    async fn insert_refund_within_balance(&self, refund: &Transaction) -> Result<RefundInsert, AppError> {
        self.check_should_fail()?;
        // Payments before transactions, the same order `transition` locks in.
        let payments = self.payments.lock().unwrap();
        let payment = payments.get(&refund.payment_id).ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(refund.payment_id.to_string()))
        })?;
        let mut transactions = self.transactions.lock().unwrap();
        let ledger: Vec<Transaction> = transactions
            .iter()
            .filter(|t| t.payment_id == refund.payment_id)
            .cloned()
            .collect();
        if let Some(key) = refund.idempotency_key() {
            if ledger.iter().any(|t| {
                t.transaction_type == TransactionType::Refund && t.idempotency_key() == Some(key)
            }) {
                return Err(AppError::Database(DatabaseError::Duplicate(
                    "transactions_refund_idempotency_key".to_string(),
                )));
            }
        }
        let committed = refund_total(&ledger, &[refund_status::PENDING, refund_status::COMPLETED]);
        if committed + refund.amount > payment.amount {
            return Ok(RefundInsert::ExceedsBalance { committed });
        }
        Self::push_transaction(&mut transactions, refund)?;
        Ok(RefundInsert::Inserted(refund.clone()))
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        self.check_should_fail()?;
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(&self, payment_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        self.check_should_fail()?;
        Ok(self.transactions_for(payment_id))
    }

    async fn find_refund_by_idempotency_key(
        &self,
        payment_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        self.check_should_fail()?;
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions
            .iter()
            .find(|t| {
                t.payment_id == payment_id
                    && t.transaction_type == TransactionType::Refund
                    && t.idempotency_key() == Some(idempotency_key)
            })
            .cloned())
    }

    async fn resolve_refund(
        &self,
        transaction_id: Uuid,
        status: &str,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut transactions = self.transactions.lock().unwrap();
        let Some(refund) = transactions.iter_mut().find(|t| {
            t.id == transaction_id
                && t.transaction_type == TransactionType::Refund
                && t.status == refund_status::PENDING
        }) else {
            return Ok(false);
        };
        refund.status = status.to_string();
        if let Some(id) = provider_transaction_id {
            refund.provider_transaction_id = Some(id.to_string());
        }
        refund.processed_at = Some(Utc::now());
        Ok(true)
    }

    async fn find_consumer_by_key_hash(&self, key_hash: &str) -> Result<Option<Consumer>, AppError> {
        self.check_should_fail()?;
        Ok(self.consumers.lock().unwrap().get(key_hash).cloned())
    }
}

/// Lifecycle of a job held by [`MockJobQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockJobStatus {
    Queued,
    Running,
    Done,
    Dead,
}

#[derive(Debug, Clone)]
pub struct MockJobEntry {
    pub id: Uuid,
    pub job: Job,
    pub status: MockJobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// In-memory job queue
pub struct MockJobQueue {
    entries: Arc<Mutex<Vec<MockJobEntry>>>,
    fail_enqueue: AtomicBool,
}

impl MockJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            fail_enqueue: AtomicBool::new(false),
        }
    }

    /// Make every enqueue fail with a connection error
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::Relaxed);
    }

    /// Every job ever enqueued, in order
    pub fn entries(&self) -> Vec<MockJobEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Jobs of `kind` in any state
    pub fn jobs_of(&self, kind: &str) -> Vec<MockJobEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.job.kind() == kind)
            .collect()
    }

    /// Jobs still waiting to run, due or not
    pub fn queued(&self) -> Vec<MockJobEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == MockJobStatus::Queued)
            .collect()
    }

    pub fn dead(&self) -> Vec<MockJobEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == MockJobStatus::Dead)
            .collect()
    }

    /// Pull every delayed job forward so it is due now
    pub fn make_all_due(&self) {
        let now = Utc::now();
        for entry in self.entries.lock().unwrap().iter_mut() {
            if entry.status == MockJobStatus::Queued && entry.run_at > now {
                entry.run_at = now;
            }
        }
    }

    fn push(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), AppError> {
        if self.fail_enqueue.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "queue unavailable".to_string(),
            )));
        }
        let max_attempts = job.max_attempts();
        self.entries.lock().unwrap().push(MockJobEntry {
            id: Uuid::now_v7(),
            job,
            status: MockJobStatus::Queued,
            attempts: 0,
            max_attempts,
            run_at,
            last_error: None,
        });
        Ok(())
    }
}

impl Default for MockJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), AppError> {
        self.push(job, Utc::now())
    }

    async fn enqueue_at(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), AppError> {
        self.push(job, run_at)
    }

    async fn claim(&self, limit: i64) -> Result<Vec<QueuedJob>, AppError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let claimed = entries
            .iter_mut()
            .filter(|e| e.status == MockJobStatus::Queued && e.run_at <= now)
            .take(limit.max(0) as usize)
            .map(|e| {
                e.status = MockJobStatus::Running;
                QueuedJob {
                    id: e.id,
                    job: e.job.clone(),
                    attempts: e.attempts,
                    max_attempts: e.max_attempts,
                    run_at: e.run_at,
                }
            })
            .collect();
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == job_id) {
            entry.status = MockJobStatus::Done;
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == job_id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            match retry_at {
                Some(at) => {
                    entry.status = MockJobStatus::Queued;
                    entry.run_at = at;
                }
                None => entry.status = MockJobStatus::Dead,
            }
        }
        Ok(())
    }
}

/// One scripted reply from [`MockProvider`]
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Success(T),
    /// The provider declined
    Failure(String),
    /// Timeout or 5xx: no answer either way
    Indeterminate(String),
    /// Transient adapter error (retryable)
    Unavailable(String),
    /// Permanent adapter error
    Rejected(String),
}

impl<T> MockReply<T> {
    fn into_result(self) -> Result<GatewayOutcome<T>, AppError> {
        match self {
            MockReply::Success(v) => Ok(GatewayOutcome::Success(v)),
            MockReply::Failure(reason) => Ok(GatewayOutcome::Failure(reason)),
            MockReply::Indeterminate(reason) => Ok(GatewayOutcome::Indeterminate(reason)),
            MockReply::Unavailable(msg) => Err(ProviderError::Unavailable(msg).into()),
            MockReply::Rejected(msg) => Err(ProviderError::Rejected(msg).into()),
        }
    }
}

/// Scripted provider adapter.
///
/// Replies are consumed in order; once a script is empty the adapter accepts
/// initiations and refunds and reports `default_status` on polls.
pub struct MockProvider {
    provider: Provider,
    initiate_replies: Mutex<VecDeque<MockReply<String>>>,
    status_replies: Mutex<VecDeque<MockReply<ProviderStatus>>>,
    refund_replies: Mutex<VecDeque<MockReply<String>>>,
    default_status: Mutex<ProviderStatus>,
    initiate_calls: AtomicUsize,
    status_calls: AtomicUsize,
    refund_calls: AtomicUsize,
    refund_references: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
}

impl MockProvider {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            initiate_replies: Mutex::new(VecDeque::new()),
            status_replies: Mutex::new(VecDeque::new()),
            refund_replies: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(ProviderStatus::Pending),
            initiate_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            refund_references: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Provider reference the mock assigns to a payment when unscripted
    #[must_use]
    pub fn reference_for(provider: Provider, payment_id: Uuid) -> String {
        format!("{}-{}", provider.as_str().to_ascii_lowercase(), payment_id)
    }

    pub fn push_initiate(&self, reply: MockReply<String>) {
        self.initiate_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_status(&self, reply: MockReply<ProviderStatus>) {
        self.status_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_refund(&self, reply: MockReply<String>) {
        self.refund_replies.lock().unwrap().push_back(reply);
    }

    pub fn set_default_status(&self, status: ProviderStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::Relaxed)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::Relaxed)
    }

    /// Gateway refund references of every refund call, in order
    pub fn refund_references(&self) -> Vec<String> {
        self.refund_references.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if self.is_healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(format!("{} unhealthy", self.provider)).into())
        }
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<GatewayOutcome<String>, AppError> {
        self.initiate_calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self.initiate_replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply.into_result(),
            None => {
                let reference = match Uuid::parse_str(&request.reference) {
                    Ok(id) => Self::reference_for(self.provider, id),
                    Err(_) => format!("{}-{}", self.provider, request.reference),
                };
                Ok(GatewayOutcome::Success(reference))
            }
        }
    }

    async fn check_status(
        &self,
        _provider_reference: &str,
    ) -> Result<GatewayOutcome<ProviderStatus>, AppError> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self.status_replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply.into_result(),
            None => Ok(GatewayOutcome::Success(*self.default_status.lock().unwrap())),
        }
    }

    async fn refund(
        &self,
        provider_reference: &str,
        refund_reference: &str,
        _amount: Decimal,
        _currency: &str,
    ) -> Result<GatewayOutcome<String>, AppError> {
        self.refund_calls.fetch_add(1, Ordering::Relaxed);
        self.refund_references
            .lock()
            .unwrap()
            .push(refund_reference.to_string());
        let scripted = self.refund_replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply.into_result(),
            None => Ok(GatewayOutcome::Success(format!("refund-{}", provider_reference))),
        }
    }

    fn map_status(&self, raw: &str) -> ProviderStatus {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESSFUL" | "COMPLETED" => ProviderStatus::Completed,
            "FAILED" => ProviderStatus::Failed,
            "PENDING" => ProviderStatus::Pending,
            "EXPIRED" => ProviderStatus::Expired,
            _ => ProviderStatus::NotFound,
        }
    }
}

/// A recorded audit call
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Audit logger that records entries (optionally failing)
#[derive(Default)]
pub struct MockAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    should_fail: AtomicBool,
}

impl MockAuditLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for(&self, action: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.entries_for(action).len()
    }
}

#[async_trait]
impl AuditLogger for MockAuditLogger {
    async fn log(
        &self,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        self.entries.lock().unwrap().push(AuditEntry {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            metadata,
        });
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                "audit sink down".to_string(),
            )));
        }
        Ok(())
    }
}

/// Usage recorder that keeps every record
#[derive(Default)]
pub struct MockUsageRecorder {
    records: Mutex<Vec<(Uuid, u64, Decimal)>>,
}

impl MockUsageRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Uuid, u64, Decimal)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageRecorder for MockUsageRecorder {
    async fn record(&self, consumer_id: Uuid, calls: u64, volume: Decimal) -> Result<(), AppError> {
        self.records.lock().unwrap().push((consumer_id, calls, volume));
        Ok(())
    }
}

/// Callback client that records deliveries (optionally failing)
#[derive(Default)]
pub struct MockCallbackClient {
    deliveries: Mutex<Vec<(String, CallbackPayload)>>,
    should_fail: AtomicBool,
}

impl MockCallbackClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn deliveries(&self) -> Vec<(String, CallbackPayload)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackClient for MockCallbackClient {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), AppError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 503,
                message: "callback endpoint down".to_string(),
            }));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}
