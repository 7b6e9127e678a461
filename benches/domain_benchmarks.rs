use criterion::{Criterion, criterion_group, criterion_main};
use mobile_money_gateway::domain::{CreatePaymentRequest, PaymentStatus, Provider};
use mobile_money_gateway::infra::{sign_payload, verify_signature};
use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::hint::black_box;
use validator::Validate;

const ALL_STATUSES: [PaymentStatus; 8] = [
    PaymentStatus::Created,
    PaymentStatus::Initiated,
    PaymentStatus::Pending,
    PaymentStatus::Completed,
    PaymentStatus::Failed,
    PaymentStatus::Expired,
    PaymentStatus::Refunded,
    PaymentStatus::Settled,
];

fn bench_validation(c: &mut Criterion) {
    let mut request = CreatePaymentRequest::new(dec!(1000), Provider::Mtn, "260976123456");
    request.callback_url = Some("https://merchant.example/callback".to_string());

    c.bench_function("validate_payment_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

fn bench_transition_table(c: &mut Criterion) {
    c.bench_function("can_transition_to_all_pairs", |b| {
        b.iter(|| {
            let mut allowed = 0;
            for from in ALL_STATUSES {
                for to in ALL_STATUSES {
                    if black_box(from).can_transition_to(black_box(to)) {
                        allowed += 1;
                    }
                }
            }
            allowed
        })
    });
}

fn bench_webhook_signature(c: &mut Criterion) {
    let secret = SecretString::from("bench-webhook-secret");
    let body = br#"{"provider_transaction_id":"ptx-1","status":"SUCCESSFUL","payment_reference":"mtn-0192"}"#;
    let signature = sign_payload(&secret, body).unwrap();

    c.bench_function("verify_webhook_signature", |b| {
        b.iter(|| verify_signature(&secret, black_box(body), black_box(&signature)))
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_transition_table,
    bench_webhook_signature
);
criterion_main!(benches);
