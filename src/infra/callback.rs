//! Outbound delivery of payment results to consumer callback URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, CallbackClient, CallbackPayload, ExternalServiceError};

use super::providers::build_http_client;
use super::signing::sign_payload;

/// Default bound on a single callback POST
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs callback payloads, optionally signed with `X-Signature`
pub struct HttpCallbackClient {
    http_client: Client,
    signing_secret: Option<SecretString>,
}

impl HttpCallbackClient {
    pub fn new(timeout: Duration, signing_secret: Option<SecretString>) -> Result<Self, AppError> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            signing_secret,
        })
    }
}

#[async_trait]
impl CallbackClient for HttpCallbackClient {
    #[instrument(skip(self, payload), fields(payment_id = %payload.payment_id, status = %payload.status))]
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), AppError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| AppError::Serialization(e.to_string()))?;

        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.signing_secret {
            request = request.header("X-Signature", sign_payload(secret, &body)?);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
            } else {
                AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(%status, "Callback endpoint rejected delivery");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message,
            }));
        }
        debug!(%status, "Callback accepted");
        Ok(())
    }
}
