//! Router assembly and request rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

use super::handlers::{
    ApiDoc, create_payment_handler, get_payment_handler, health_check_handler,
    list_payments_handler, list_transactions_handler, liveness_handler, metrics_handler,
    readiness_handler, reconciliation_handler, refund_payment_handler, status_check_handler,
    webhook_handler,
};

/// Largest request body accepted, webhooks included
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Per-process rate limit applied to consumer routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

impl RateLimitConfig {
    /// Read `RATE_LIMIT_RPS` and `RATE_LIMIT_BURST`, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: u32| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        Self {
            requests_per_second: read("RATE_LIMIT_RPS", defaults.requests_per_second),
            burst_size: read("RATE_LIMIT_BURST", defaults.burst_size),
        }
    }

    fn limiter(&self) -> DefaultDirectRateLimiter {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(rps);
        RateLimiter::direct(Quota::per_second(rps).allow_burst(burst))
    }
}

/// Create the router without rate limiting
pub fn create_router(state: Arc<AppState>) -> Router {
    build_router(state, None)
}

/// Create the router with consumer routes rate limited
pub fn create_router_with_rate_limit(state: Arc<AppState>, config: RateLimitConfig) -> Router {
    info!(
        rps = config.requests_per_second,
        burst = config.burst_size,
        "Rate limiting enabled"
    );
    build_router(state, Some(Arc::new(config.limiter())))
}

fn build_router(state: Arc<AppState>, limiter: Option<Arc<DefaultDirectRateLimiter>>) -> Router {
    let mut consumer_routes = Router::new()
        .route(
            "/payments",
            post(create_payment_handler).get(list_payments_handler),
        )
        .route("/payments/{id}", get(get_payment_handler))
        .route("/payments/{id}/refunds", post(refund_payment_handler))
        .route(
            "/payments/{id}/transactions",
            get(list_transactions_handler),
        )
        .route("/payments/{id}/status-check", post(status_check_handler))
        .route("/admin/reconciliation", post(reconciliation_handler));

    if let Some(limiter) = limiter {
        consumer_routes =
            consumer_routes.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    // Providers retry on their own schedule; webhooks and probes are never throttled.
    let open_routes = Router::new()
        .route("/webhooks/{provider}", post(webhook_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(consumer_routes)
        .merge(open_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn rate_limit(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait.as_secs().max(1);
            warn!(retry_after, "Rate limit exceeded");
            let body = RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
                retry_after,
            };
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.to_string())],
                Json(body),
            )
                .into_response()
        }
    }
}
