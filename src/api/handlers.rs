//! HTTP request handlers with OpenAPI documentation.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::IntoResponse,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};
use uuid::Uuid;

use crate::app::{AppState, MetricsSnapshot};
use crate::domain::{
    AppError, Consumer, CreatePaymentRequest, DatabaseError, ErrorDetail, ErrorResponse,
    ExternalServiceError, HealthResponse, HealthStatus, Job, ListPaymentsParams,
    PaginatedResponse, Payment, Provider, ProviderError, RateLimitResponse,
    ReconciliationRequest, RefundRequest, Transaction, WebhookAck, WebhookOutcome,
};

/// Header carrying the consumer API key
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the caller's idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Header carrying the webhook HMAC
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mobile Money Gateway API",
        version = "0.1.0",
        description = "Collect payments over MTN and Airtel mobile money and track them to settlement",
        license(
            name = "MIT"
        )
    ),
    paths(
        create_payment_handler,
        list_payments_handler,
        get_payment_handler,
        refund_payment_handler,
        list_transactions_handler,
        status_check_handler,
        webhook_handler,
        reconciliation_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
        metrics_handler,
    ),
    components(
        schemas(
            Payment,
            Transaction,
            CreatePaymentRequest,
            RefundRequest,
            crate::domain::PaymentStatus,
            crate::domain::TransactionType,
            Provider,
            ListPaymentsParams,
            PaginatedResponse<Payment>,
            crate::domain::WebhookPayload,
            WebhookAck,
            WebhookOutcome,
            ReconciliationRequest,
            ReconciliationQueued,
            crate::domain::CallbackPayload,
            HealthResponse,
            HealthStatus,
            MetricsSnapshot,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "payments", description = "Payment lifecycle endpoints"),
        (name = "webhooks", description = "Provider status notifications"),
        (name = "admin", description = "Operational endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    modifiers(&ApiKeyAddon)
)]
pub struct ApiDoc;

struct ApiKeyAddon;

impl Modify for ApiKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

/// Consumer resolved from the `X-API-Key` header
#[derive(Debug, Clone)]
pub struct AuthenticatedConsumer(pub Consumer);

impl FromRequestParts<Arc<AppState>> for AuthenticatedConsumer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header_str(&parts.headers, API_KEY_HEADER)
            .ok_or_else(|| AppError::Authentication("Missing X-API-Key header".to_string()))?;
        let consumer = state.service.authenticate(api_key).await?;
        Ok(Self(consumer))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Acknowledgement for a queued reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationQueued {
    pub date: NaiveDate,
    pub queued: bool,
}

/// Create a payment
///
/// The payment is persisted as `CREATED` and initiation with the provider happens
/// in the background. Repeating a request with the same `Idempotency-Key` returns
/// the original payment unchanged.
#[utoipa::path(
    post,
    path = "/payments",
    tag = "payments",
    request_body = CreatePaymentRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retried requests")
    ),
    responses(
        (status = 201, description = "Payment accepted", body = Payment),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let idempotency_key = header_str(&headers, IDEMPOTENCY_KEY_HEADER);
    let payment = state
        .service
        .create_payment(&payload, consumer.id, idempotency_key)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// List the caller's payments, newest first
#[utoipa::path(
    get,
    path = "/payments",
    tag = "payments",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("from" = Option<String>, Query, description = "Created at or after (RFC 3339)"),
        ("to" = Option<String>, Query, description = "Created before (RFC 3339)"),
        ("limit" = Option<i64>, Query, description = "Maximum number of payments to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Payment ID to continue after")
    ),
    responses(
        (status = 200, description = "Page of payments", body = PaginatedResponse<Payment>),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn list_payments_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Query(params): Query<ListPaymentsParams>,
) -> Result<Json<PaginatedResponse<Payment>>, AppError> {
    let page = state.service.list_payments(consumer.id, &params).await?;
    Ok(Json(page))
}

/// Get a single payment
///
/// A payment still waiting on the provider past its expiry is moved to `EXPIRED`
/// before it is returned.
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment found", body = Payment),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn get_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.service.get_payment(consumer.id, id).await?;
    Ok(Json(payment))
}

/// Request a refund
///
/// Only `COMPLETED` or `SETTLED` payments can be refunded, and the total refunded
/// never exceeds the payment amount. The provider call is made asynchronously;
/// the returned ledger entry starts `pending`.
#[utoipa::path(
    post,
    path = "/payments/{id}/refunds",
    tag = "payments",
    request_body = RefundRequest,
    params(
        ("id" = Uuid, Path, description = "Payment ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retried requests")
    ),
    responses(
        (status = 202, description = "Refund accepted", body = Transaction),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Payment not refundable or amount exceeds balance", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn refund_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let idempotency_key = header_str(&headers, IDEMPOTENCY_KEY_HEADER);
    let refund = state
        .service
        .refund_payment(id, &payload, consumer.id, idempotency_key)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(refund)))
}

/// List the ledger entries of a payment, oldest first
#[utoipa::path(
    get,
    path = "/payments/{id}/transactions",
    tag = "payments",
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Ledger entries", body = Vec<Transaction>),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn list_transactions_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let transactions = state.service.list_transactions(consumer.id, id).await?;
    Ok(Json(transactions))
}

/// Ask the provider for the current status of a payment
///
/// Waiting payments are polled; a COMPLETED payment is reconciled and may become `SETTLED`.
#[utoipa::path(
    post,
    path = "/payments/{id}/status-check",
    tag = "payments",
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment after the check", body = Payment),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 502, description = "Provider error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn status_check_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.service.get_payment(consumer.id, id).await?;
    let payment = state.reconciliation.check_payment(payment.id).await?;
    Ok(Json(payment))
}

/// Receive a provider status notification
///
/// The raw body is authenticated with the provider's shared secret before it is
/// parsed. Once accepted, the delivery is always acknowledged with 200, including
/// reports that are duplicates, conflicts, or cannot be matched to a payment.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    tag = "webhooks",
    request_body = crate::domain::WebhookPayload,
    params(
        ("provider" = String, Path, description = "MTN or AIRTEL"),
        ("X-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")
    ),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAck),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 404, description = "Unknown provider", body = ErrorResponse)
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let provider = Provider::from_str(&provider).map_err(AppError::NotFound)?;
    let signature = header_str(&headers, SIGNATURE_HEADER);
    let outcome = state.webhooks.ingest(provider, &body, signature).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

/// Queue reconciliation for one day
///
/// Defaults to yesterday (UTC). Re-running a day is safe.
#[utoipa::path(
    post,
    path = "/admin/reconciliation",
    tag = "admin",
    request_body = ReconciliationRequest,
    responses(
        (status = 202, description = "Reconciliation queued", body = ReconciliationQueued),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn reconciliation_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedConsumer(consumer): AuthenticatedConsumer,
    Json(payload): Json<ReconciliationRequest>,
) -> Result<(StatusCode, Json<ReconciliationQueued>), AppError> {
    let date = match payload.date {
        Some(date) => date,
        None => Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| AppError::Internal("date out of range".to_string()))?,
    };
    state.queue.enqueue(Job::DailyReconciliation { date }).await?;
    info!(%date, requested_by = %consumer.id, "Reconciliation queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ReconciliationQueued { date, queued: true }),
    ))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// In-process counters
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Counter snapshot", body = MetricsSnapshot)
    )
)]
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Provider(provider_err) => match provider_err {
                ProviderError::NotConfigured(_) => (
                    StatusCode::BAD_REQUEST,
                    "provider_not_configured",
                    self.to_string(),
                ),
                ProviderError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (StatusCode::BAD_GATEWAY, "provider_error", self.to_string()),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::InvalidSignature(_) => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigError, ValidationError};

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(AppError::Validation(ValidationError::MissingField("amount".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(AppError::Database(DatabaseError::NotFound("x".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(AppError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(AppError::InvalidSignature("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::Provider(ProviderError::Unavailable("x".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(AppError::Config(ConfigError::MissingEnv("X".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(AppError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_header_str_trims_and_skips_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, "  key-1 ".parse().unwrap());
        headers.insert(API_KEY_HEADER, "".parse().unwrap());
        assert_eq!(header_str(&headers, IDEMPOTENCY_KEY_HEADER), Some("key-1"));
        assert_eq!(header_str(&headers, API_KEY_HEADER), None);
        assert_eq!(header_str(&headers, SIGNATURE_HEADER), None);
    }
}
