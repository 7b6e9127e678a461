//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;

pub use handlers::{
    API_KEY_HEADER, ApiDoc, AuthenticatedConsumer, IDEMPOTENCY_KEY_HEADER, ReconciliationQueued,
    SIGNATURE_HEADER,
};
pub use router::{RateLimitConfig, create_router, create_router_with_rate_limit};
