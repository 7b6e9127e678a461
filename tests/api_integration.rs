//! HTTP-level tests of the router over the mock harness.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Days, Utc};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use mobile_money_gateway::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use mobile_money_gateway::domain::{Job, PaymentStatus, Provider, ProviderStatus};
use mobile_money_gateway::test_utils::{TEST_API_KEY, TestHarness};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-Key", TEST_API_KEY);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn payment_body() -> Value {
    json!({
        "amount": "1000",
        "provider": "MTN",
        "phone_number": "260976123456",
        "external_reference": "order-77",
    })
}

#[tokio::test]
async fn test_missing_or_unknown_api_key_is_unauthorized() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let request = Request::builder()
        .method("GET")
        .uri("/payments")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "authentication_error");

    let request = Request::builder()
        .method("GET")
        .uri("/payments")
        .header("X-API-Key", "mmg_wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_payment_returns_created() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let (status, body) = send(&router, authed("POST", "/payments", Some(payment_body()))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "CREATED");
    assert_eq!(body["provider"], "MTN");
    assert_eq!(body["amount"], "1000");
    assert_eq!(body["external_reference"], "order-77");
    assert_eq!(h.store.all_payments().len(), 1);
}

#[tokio::test]
async fn test_create_payment_idempotency_header() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut request = authed("POST", "/payments", Some(payment_body()));
        request
            .headers_mut()
            .insert("Idempotency-Key", "checkout-5".parse().unwrap());
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    assert_eq!(ids[0], ids[1]);
    assert_eq!(h.store.all_payments().len(), 1);
}

#[tokio::test]
async fn test_create_payment_validation_error() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let body = json!({ "amount": "0", "provider": "AIRTEL", "phone_number": "12" });
    let (status, body) = send(&router, authed("POST", "/payments", Some(body))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");
    assert!(h.store.all_payments().is_empty());
}

#[tokio::test]
async fn test_get_payment_scoped_to_consumer() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    let payment = h.create_payment(dec!(500), Provider::Airtel, None).await.unwrap();
    h.store.add_consumer("rival", "rival-key");

    let (status, body) = send(&router, authed("GET", &format!("/payments/{}", payment.id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], payment.id.to_string());

    let request = Request::builder()
        .method("GET")
        .uri(format!("/payments/{}", payment.id))
        .header("X-API-Key", "rival-key")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");

    let (status, _) = send(&router, authed("GET", &format!("/payments/{}", Uuid::now_v7()), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_payments_with_filter_and_pagination() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    for _ in 0..3 {
        h.create_payment(dec!(10), Provider::Mtn, None).await.unwrap();
    }
    let pending = h.create_pending_payment(dec!(20), Provider::Mtn).await.unwrap();

    let (status, body) = send(&router, authed("GET", "/payments?limit=2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);
    let cursor = body["next_cursor"].as_str().unwrap().to_string();

    let (_, next) = send(&router, authed("GET", &format!("/payments?limit=2&cursor={cursor}"), None)).await;
    assert_eq!(next["items"].as_array().unwrap().len(), 2);
    assert_eq!(next["has_more"], false);

    let (_, filtered) = send(&router, authed("GET", "/payments?status=PENDING", None)).await;
    let items = filtered["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], pending.id.to_string());

    let (status, _) = send(&router, authed("GET", "/payments?limit=500", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refund_endpoint() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    let payment = h.create_pending_payment(dec!(1000), Provider::Mtn).await.unwrap();
    let uri = format!("/payments/{}/refunds", payment.id);

    let (status, body) = send(&router, authed("POST", &uri, Some(json!({ "reason": "early" })))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "conflict");

    h.state
        .service
        .update_payment_status(payment.id, PaymentStatus::Completed, None, None)
        .await
        .unwrap();

    let too_much = json!({ "amount": "1500", "reason": "Customer cancelled" });
    let (status, _) = send(&router, authed("POST", &uri, Some(too_much))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let partial = json!({ "amount": "250", "reason": "Customer cancelled" });
    let (status, body) = send(&router, authed("POST", &uri, Some(partial))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["type"], "refund");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], "250");

    let (status, ledger) = send(
        &router,
        authed("GET", &format!("/payments/{}/transactions", payment.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ledger = ledger.as_array().unwrap();
    assert!(ledger.iter().any(|t| t["type"] == "refund"));
}

#[tokio::test]
async fn test_status_check_endpoint_polls_provider() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    let payment = h.create_pending_payment(dec!(70), Provider::Airtel).await.unwrap();
    h.airtel
        .set_default_status(ProviderStatus::Completed);

    let (status, body) = send(
        &router,
        authed("POST", &format!("/payments/{}/status-check", payment.id), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(h.airtel.status_calls(), 1);
}

#[tokio::test]
async fn test_webhook_signature_enforced() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    let payment = h.create_pending_payment(dec!(100), Provider::Mtn).await.unwrap();
    let body = serde_json::to_vec(&json!({
        "provider_transaction_id": "ptx-1",
        "status": "SUCCESSFUL",
        "payment_reference": payment.provider_reference.clone().unwrap(),
    }))
    .unwrap();

    let forged = Request::builder()
        .method("POST")
        .uri("/webhooks/mtn")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Signature", "00ff")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, response) = send(&router, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["type"], "invalid_signature");
    assert_eq!(h.store.payment(payment.id).unwrap().status, PaymentStatus::Pending);

    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/mtn")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Signature", h.sign(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, response) = send(&router, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["received"], true);
    assert_eq!(response["outcome"], "applied");
    assert_eq!(h.store.payment(payment.id).unwrap().status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_webhook_unknown_provider_is_not_found() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/zamtel")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_processing_failure_still_acknowledged() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    let body = b"{\"unexpected\":true}".to_vec();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/airtel")
        .header("X-Signature", h.sign(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, response) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "ignored");
}

#[tokio::test]
async fn test_reconciliation_endpoint_queues_job() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let (status, body) = send(
        &router,
        authed("POST", "/admin/reconciliation", Some(json!({ "date": "2026-03-14" }))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["date"], "2026-03-14");
    assert_eq!(body["queued"], true);

    let (status, body) = send(&router, authed("POST", "/admin/reconciliation", Some(json!({})))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let yesterday = Utc::now().date_naive().checked_sub_days(Days::new(1)).unwrap();
    assert_eq!(body["date"], yesterday.to_string());

    let jobs = h.queue.jobs_of("daily-reconciliation");
    assert_eq!(jobs.len(), 2);
    assert!(matches!(jobs[0].job, Job::DailyReconciliation { .. }));
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());

    let (status, body) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&router, Request::get("/health/live").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    h.mtn.set_healthy(false);
    let (_, body) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(body["providers"], "degraded");
    let (status, _) = send(&router, Request::get("/health/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    h.store.set_healthy(false);
    let (status, _) = send(&router, Request::get("/health/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_counters() {
    let h = TestHarness::new();
    let router = create_router(h.state.clone());
    h.create_payment(dec!(5), Provider::Mtn, Some("m1")).await.unwrap();
    h.create_payment(dec!(5), Provider::Mtn, Some("m1")).await.unwrap();

    let (status, body) = send(&router, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payments_created"], 1);
    assert_eq!(body["idempotent_replays"], 1);
}

#[tokio::test]
async fn test_rate_limit_applies_to_consumer_routes_only() {
    let h = TestHarness::new();
    let router = create_router_with_rate_limit(
        h.state.clone(),
        RateLimitConfig {
            requests_per_second: 1,
            burst_size: 2,
        },
    );

    for _ in 0..2 {
        let (status, _) = send(&router, authed("GET", "/payments", None)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let response = router
        .clone()
        .oneshot(authed("GET", "/payments", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let (status, _) = send(&router, Request::get("/health/live").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
}
