//! Test doubles and a wired-up application for tests.

pub mod mocks;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::app::{AppState, JobContext, ProviderRegistry, ServiceConfig, process_batch};
use crate::domain::{AppError, Consumer, CreatePaymentRequest, Payment, Provider};
use crate::infra::sign_payload;

pub use mocks::{
    AuditEntry, MockAuditLogger, MockCallbackClient, MockConfig, MockJobEntry, MockJobQueue,
    MockJobStatus, MockPaymentStore, MockProvider, MockReply, MockUsageRecorder,
};

/// Shared secret both mock providers sign webhooks with
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";
/// API key of the consumer created by [`TestHarness::new`]
pub const TEST_API_KEY: &str = "mmg_test_key";

/// Application state over mocks, with handles to every mock
pub struct TestHarness {
    pub state: Arc<AppState>,
    pub store: Arc<MockPaymentStore>,
    pub queue: Arc<MockJobQueue>,
    pub mtn: Arc<MockProvider>,
    pub airtel: Arc<MockProvider>,
    pub audit: Arc<MockAuditLogger>,
    pub usage: Arc<MockUsageRecorder>,
    pub callbacks: Arc<MockCallbackClient>,
    pub consumer: Consumer,
    job_context: JobContext,
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MockPaymentStore::new());
        let queue = Arc::new(MockJobQueue::new());
        let mtn = Arc::new(MockProvider::new(Provider::Mtn));
        let airtel = Arc::new(MockProvider::new(Provider::Airtel));
        let audit = Arc::new(MockAuditLogger::new());
        let usage = Arc::new(MockUsageRecorder::new());
        let callbacks = Arc::new(MockCallbackClient::new());
        let consumer = store.add_consumer("test-merchant", TEST_API_KEY);

        let registry = ProviderRegistry::new()
            .with(mtn.clone())
            .with(airtel.clone());
        let secrets: HashMap<Provider, SecretString> = Provider::ALL
            .into_iter()
            .map(|p| (p, SecretString::from(TEST_WEBHOOK_SECRET)))
            .collect();

        let state = AppState::new(
            store.clone(),
            queue.clone(),
            registry,
            audit.clone(),
            usage.clone(),
            config,
        )
        .with_webhook_secrets(secrets);
        let job_context = state.job_context(callbacks.clone());

        Self {
            state: Arc::new(state),
            store,
            queue,
            mtn,
            airtel,
            audit,
            usage,
            callbacks,
            consumer,
            job_context,
        }
    }

    pub fn job_context(&self) -> &JobContext {
        &self.job_context
    }

    pub fn provider(&self, provider: Provider) -> &Arc<MockProvider> {
        match provider {
            Provider::Mtn => &self.mtn,
            Provider::Airtel => &self.airtel,
        }
    }

    /// Run due jobs until the queue has nothing due. Returns jobs processed.
    pub async fn run_jobs(&self) -> usize {
        let mut total = 0;
        // Bounded so a job that keeps re-enqueueing itself as due cannot spin forever.
        for _ in 0..20 {
            match process_batch(&self.job_context, 50).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    }

    /// Hex HMAC-SHA256 of `body` under the test webhook secret
    pub fn sign(&self, body: &[u8]) -> String {
        sign_payload(&SecretString::from(TEST_WEBHOOK_SECRET), body)
            .unwrap_or_default()
    }

    /// Create a payment for the harness consumer
    pub async fn create_payment(
        &self,
        amount: Decimal,
        provider: Provider,
        idempotency_key: Option<&str>,
    ) -> Result<Payment, AppError> {
        let mut request = CreatePaymentRequest::new(amount, provider, "260971234567");
        request.callback_url = Some("https://merchant.example/callback".to_string());
        self.state
            .service
            .create_payment(&request, self.consumer.id, idempotency_key)
            .await
    }

    /// Create a payment and run its initiation, leaving it PENDING
    pub async fn create_pending_payment(
        &self,
        amount: Decimal,
        provider: Provider,
    ) -> Result<Payment, AppError> {
        let payment = self.create_payment(amount, provider, None).await?;
        self.run_jobs().await;
        self.state
            .service
            .get_payment(self.consumer.id, payment.id)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
