//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod jobs;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ExternalServiceError, ProviderError, ValidationError,
};
pub use jobs::{Job, QueuedJob};
pub use traits::{
    AuditLogger, CallbackClient, GatewayOutcome, InitiateRequest, JobQueue, PaymentProvider,
    PaymentStore, RefundInsert, StatusChange, UsageRecorder,
};
pub use types::{
    CallbackPayload, Consumer, CreatePaymentRequest, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, ListPaymentsParams, PaginatedResponse, Payment, PaymentFilter, PaymentStatus,
    Provider, ProviderStatus, RateLimitResponse, ReconciliationRequest, ReconciliationSummary,
    RefundRequest, Transaction, TransactionType, WebhookAck, WebhookOutcome, WebhookPayload,
    refund_status,
};
