//! Domain types with validation support.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Mobile network operator handling a payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Mtn,
    Airtel,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Mtn, Provider::Airtel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mtn => "MTN",
            Self::Airtel => "AIRTEL",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MTN" => Ok(Self::Mtn),
            "AIRTEL" => Ok(Self::Airtel),
            _ => Err(format!("Invalid provider: {}", s)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a payment.
///
/// ```text
/// CREATED -> INITIATED -> PENDING -> COMPLETED -> SETTLED
///                                  \           \-> REFUNDED
///                                   -> FAILED | EXPIRED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Persisted, initiation job queued
    #[default]
    Created,
    /// Initiation call to the provider in flight
    Initiated,
    /// Provider accepted the request, waiting for the customer
    Pending,
    /// Provider confirmed the debit
    Completed,
    Failed,
    Expired,
    Refunded,
    /// Confirmed again by daily reconciliation
    Settled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
            Self::Refunded => "REFUNDED",
            Self::Settled => "SETTLED",
        }
    }

    /// No further transition is possible except the refund sub-flow out of SETTLED.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Expired | Self::Refunded | Self::Settled
        )
    }

    /// The provider has produced an outcome. Statuses past this point never regress.
    pub fn is_resolved(&self) -> bool {
        self.is_terminal() || *self == Self::Completed
    }

    /// Still waiting on the provider; subject to expiry.
    pub fn is_awaiting_provider(&self) -> bool {
        matches!(self, Self::Created | Self::Initiated | Self::Pending)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::Completed | Self::Settled)
    }

    /// Transition table. Same-status moves are not transitions.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Initiated | Failed | Expired)
                | (Initiated, Pending | Completed | Failed | Expired)
                | (Pending, Completed | Failed | Expired)
                | (Completed, Settled | Refunded)
                | (Settled, Refunded)
        )
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "INITIATED" => Ok(Self::Initiated),
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "EXPIRED" => Ok(Self::Expired),
            "REFUNDED" => Ok(Self::Refunded),
            "SETTLED" => Ok(Self::Settled),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared status vocabulary every provider adapter translates into
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Completed,
    Failed,
    Expired,
    NotFound,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::NotFound => "not_found",
        }
    }

    /// Payment status a report maps onto. `NotFound` carries no state.
    pub fn as_payment_status(&self) -> Option<PaymentStatus> {
        match self {
            Self::Pending => Some(PaymentStatus::Pending),
            Self::Completed => Some(PaymentStatus::Completed),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Expired => Some(PaymentStatus::Expired),
            Self::NotFound => None,
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Fee,
    Settlement,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Refund => "refund",
            Self::Fee => "fee",
            Self::Settlement => "settlement",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "refund" => Ok(Self::Refund),
            "fee" => Ok(Self::Fee),
            "settlement" => Ok(Self::Settlement),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

/// Status strings used on refund transactions
pub mod refund_status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// A single money-movement request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub consumer_id: Uuid,
    /// Caller-supplied reference, not unique
    #[schema(example = "order-8841")]
    pub external_reference: Option<String>,
    #[schema(value_type = String, example = "1000")]
    pub amount: Decimal,
    #[schema(example = "ZMW")]
    pub currency: String,
    pub provider: Provider,
    #[schema(example = "260976123456")]
    pub phone_number: String,
    pub status: PaymentStatus,
    /// Assigned by the provider on initiation
    pub provider_reference: Option<String>,
    pub callback_url: Option<String>,
    pub idempotency_key: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[must_use]
    pub fn new(
        consumer_id: Uuid,
        request: &CreatePaymentRequest,
        idempotency_key: Option<String>,
        currency: &str,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            consumer_id,
            external_reference: request.external_reference.clone(),
            amount: request.amount,
            currency: currency.to_string(),
            provider: request.provider,
            phone_number: normalize_phone(&request.phone_number),
            status: PaymentStatus::Created,
            provider_reference: None,
            callback_url: request.callback_url.clone(),
            idempotency_key,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    /// Past its expiry while the provider never produced an outcome
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_awaiting_provider() && now >= self.expires_at
    }
}

/// Immutable ledger entry attached to a payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[schema(value_type = String, example = "1000")]
    pub amount: Decimal,
    /// Free-form status as reported at the time of the event
    pub status: String,
    pub provider_transaction_id: Option<String>,
    /// Opaque provider or gateway payload
    #[schema(value_type = Object)]
    pub raw_payload: serde_json::Value,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn new(
        payment_id: Uuid,
        transaction_type: TransactionType,
        amount: Decimal,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            payment_id,
            transaction_type,
            amount,
            status: status.into(),
            provider_transaction_id: None,
            raw_payload: serde_json::Value::Null,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_provider_transaction_id(mut self, id: Option<String>) -> Self {
        self.provider_transaction_id = id;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    #[must_use]
    pub fn processed_now(mut self) -> Self {
        self.processed_at = Some(Utc::now());
        self
    }

    /// Idempotency key recorded on a refund transaction
    pub fn idempotency_key(&self) -> Option<&str> {
        self.raw_payload.get("idempotency_key")?.as_str()
    }
}

/// An authenticated API consumer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Consumer {
    pub id: Uuid,
    pub name: String,
}

/// Request to create a payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    /// Amount in the gateway currency, at most two decimal places
    #[validate(custom(function = "validate_amount"))]
    #[schema(value_type = String, example = "1000")]
    pub amount: Decimal,
    pub provider: Provider,
    /// Destination wallet MSISDN in international format
    #[validate(custom(function = "validate_phone_number"))]
    #[schema(example = "260976123456")]
    pub phone_number: String,
    #[validate(length(min = 1, max = 255, message = "External reference must be 1-255 characters"))]
    #[schema(example = "order-8841")]
    pub external_reference: Option<String>,
    #[validate(url(message = "Callback URL must be a valid URL"))]
    #[schema(example = "https://merchant.example.com/payments/callback")]
    pub callback_url: Option<String>,
    /// May also be supplied via the `Idempotency-Key` header
    #[validate(length(min = 1, max = 255, message = "Idempotency key must be 1-255 characters"))]
    pub idempotency_key: Option<String>,
}

impl CreatePaymentRequest {
    #[must_use]
    pub fn new(amount: Decimal, provider: Provider, phone_number: impl Into<String>) -> Self {
        Self {
            amount,
            provider,
            phone_number: phone_number.into(),
            external_reference: None,
            callback_url: None,
            idempotency_key: None,
        }
    }
}

/// Request to refund a completed payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    /// Defaults to the full payment amount
    #[validate(custom(function = "validate_amount"))]
    #[schema(value_type = Option<String>, example = "250")]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    #[schema(example = "Customer cancelled order")]
    pub reason: String,
}

fn validate_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(validator::ValidationError::new("amount")
            .with_message("Amount must be greater than 0".into()));
    }
    if amount.normalize().scale() > 2 {
        return Err(validator::ValidationError::new("amount")
            .with_message("Amount must have at most two decimal places".into()));
    }
    Ok(())
}

fn validate_phone_number(phone: &str) -> Result<(), validator::ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 9 || digits.len() > 15 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(validator::ValidationError::new("phone_number")
            .with_message("Phone number must be 9-15 digits".into()));
    }
    Ok(())
}

fn normalize_phone(phone: &str) -> String {
    phone.trim().trim_start_matches('+').to_string()
}

/// Query parameters for listing payments
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ListPaymentsParams {
    pub status: Option<PaymentStatus>,
    /// Created at or after
    pub from: Option<DateTime<Utc>>,
    /// Created before
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (ID to start after)
    pub cursor: Option<Uuid>,
}

fn default_limit() -> i64 {
    20
}

impl Default for ListPaymentsParams {
    fn default() -> Self {
        Self {
            status: None,
            from: None,
            to: None,
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Filter handed to the store, always scoped to one consumer
#[derive(Debug, Clone)]
pub struct PaymentFilter {
    pub consumer_id: Uuid,
    pub status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    /// List of items
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    pub next_cursor: Option<Uuid>,
    /// Whether more items exist
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<Uuid>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Body pushed by a provider to the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookPayload {
    pub provider_transaction_id: String,
    /// Provider-specific status string
    #[schema(example = "SUCCESSFUL")]
    pub status: String,
    /// Gateway payment id or provider reference
    pub payment_reference: String,
}

/// Result of ingesting one webhook
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Status transition applied
    Applied,
    /// Already at the reported status
    Duplicate,
    /// Conflicting report recorded for review only
    Conflict,
    /// Payload or payment could not be processed
    Ignored,
}

/// Acknowledgement returned to the provider
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// Body POSTed to the consumer's callback URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CallbackPayload {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub external_reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-run reconciliation report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ReconciliationSummary {
    pub date: NaiveDate,
    pub total_checked: u64,
    pub reconciled: u64,
    pub discrepancies: u64,
    /// Provider could not be reached for these payments
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Request to run reconciliation for a given day
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationRequest {
    /// Defaults to yesterday (UTC)
    pub date: Option<NaiveDate>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Worst provider health status
    pub providers: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, providers: HealthStatus) -> Self {
        // Database loss is fatal; provider loss only degrades.
        let status = match (&database, &providers) {
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            providers,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Amount must be greater than 0")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 1)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_payment_status_display_and_parsing() {
        let statuses = vec![
            (PaymentStatus::Created, "CREATED"),
            (PaymentStatus::Initiated, "INITIATED"),
            (PaymentStatus::Pending, "PENDING"),
            (PaymentStatus::Completed, "COMPLETED"),
            (PaymentStatus::Failed, "FAILED"),
            (PaymentStatus::Expired, "EXPIRED"),
            (PaymentStatus::Refunded, "REFUNDED"),
            (PaymentStatus::Settled, "SETTLED"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(PaymentStatus::from_str(string).unwrap(), status);
        }

        assert!(PaymentStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_happy_path_transitions_allowed() {
        use PaymentStatus::*;
        assert!(Created.can_transition_to(Initiated));
        assert!(Initiated.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Settled));
        assert!(Completed.can_transition_to(Refunded));
        assert!(Settled.can_transition_to(Refunded));
    }

    #[test]
    fn test_resolved_statuses_never_regress() {
        use PaymentStatus::*;
        let all = [
            Created, Initiated, Pending, Completed, Failed, Expired, Refunded, Settled,
        ];
        for from in all.iter().filter(|s| s.is_resolved()) {
            for to in [Created, Initiated, Pending, Failed, Expired] {
                assert!(
                    !from.can_transition_to(to),
                    "{} must not move to {}",
                    from,
                    to
                );
            }
        }
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Expired.can_transition_to(Completed));
        assert!(!Refunded.can_transition_to(Settled));
    }

    #[test]
    fn test_no_self_transitions() {
        use PaymentStatus::*;
        for s in [Created, Initiated, Pending, Completed, Failed, Expired, Refunded, Settled] {
            assert!(!s.can_transition_to(s));
        }
    }

    #[test]
    fn test_provider_parsing_is_case_insensitive() {
        assert_eq!(Provider::from_str("mtn").unwrap(), Provider::Mtn);
        assert_eq!(Provider::from_str("Airtel").unwrap(), Provider::Airtel);
        assert!(Provider::from_str("zamtel").is_err());
        assert_eq!(
            serde_json::to_string(&Provider::Mtn).unwrap(),
            "\"MTN\"".to_string()
        );
    }

    #[test]
    fn test_create_payment_request_validation() {
        let req = CreatePaymentRequest::new(dec!(1000), Provider::Mtn, "260976123456");
        assert!(req.validate().is_ok());

        let req = CreatePaymentRequest::new(dec!(0), Provider::Mtn, "260976123456");
        assert!(req.validate().is_err());

        let req = CreatePaymentRequest::new(dec!(-5), Provider::Mtn, "260976123456");
        assert!(req.validate().is_err());

        let req = CreatePaymentRequest::new(dec!(10.005), Provider::Mtn, "260976123456");
        assert!(req.validate().is_err());

        let req = CreatePaymentRequest::new(dec!(10), Provider::Airtel, "12345");
        assert!(req.validate().is_err());

        let req = CreatePaymentRequest::new(dec!(10), Provider::Airtel, "26097abc3456");
        assert!(req.validate().is_err());

        let mut req = CreatePaymentRequest::new(dec!(10), Provider::Airtel, "+260976123456");
        assert!(req.validate().is_ok());
        req.callback_url = Some("not a url".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_new_payment_defaults() {
        let consumer = Uuid::new_v4();
        let req = CreatePaymentRequest::new(dec!(1000), Provider::Mtn, "+260976123456");
        let payment = Payment::new(consumer, &req, None, "ZMW", Duration::minutes(30));

        assert_eq!(payment.status, PaymentStatus::Created);
        assert_eq!(payment.phone_number, "260976123456");
        assert!(payment.provider_reference.is_none());
        assert_eq!(payment.expires_at - payment.created_at, Duration::minutes(30));
        assert!(!payment.is_expired_at(payment.created_at));
        assert!(payment.is_expired_at(payment.expires_at));
    }

    #[test]
    fn test_resolved_payment_never_expires() {
        let req = CreatePaymentRequest::new(dec!(10), Provider::Mtn, "260976123456");
        let mut payment = Payment::new(Uuid::new_v4(), &req, None, "ZMW", Duration::minutes(30));
        payment.status = PaymentStatus::Completed;
        assert!(!payment.is_expired_at(payment.expires_at + Duration::days(1)));
    }

    #[test]
    fn test_refund_transaction_idempotency_key() {
        let tx = Transaction::new(Uuid::new_v4(), TransactionType::Refund, dec!(5), "pending")
            .with_payload(serde_json::json!({"idempotency_key": "r-1", "reason": "dup"}));
        assert_eq!(tx.idempotency_key(), Some("r-1"));

        let tx = Transaction::new(Uuid::new_v4(), TransactionType::Payment, dec!(5), "PENDING");
        assert_eq!(tx.idempotency_key(), None);
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(
            ProviderStatus::Completed.as_payment_status(),
            Some(PaymentStatus::Completed)
        );
        assert_eq!(ProviderStatus::NotFound.as_payment_status(), None);
    }

    #[test]
    fn test_health_response_degrades_on_provider_outage() {
        let health = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(health.status, HealthStatus::Degraded);
        let health = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
