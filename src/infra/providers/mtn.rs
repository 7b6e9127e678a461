//! MTN Mobile Money adapter (Collection and Disbursement APIs).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, GatewayOutcome, InitiateRequest, PaymentProvider, Provider, ProviderError,
    ProviderStatus,
};

use super::token::TokenCache;
use super::{DEFAULT_PROVIDER_TIMEOUT, Dispatch, build_http_client, decode, dispatch, rejection};

/// Default MTN MoMo sandbox base URL
pub const DEFAULT_MTN_BASE_URL: &str = "https://sandbox.momodeveloper.mtn.com";

#[derive(Debug)]
pub struct MtnConfig {
    pub base_url: String,
    /// API user id (a UUID provisioned per environment)
    pub api_user: String,
    pub api_key: SecretString,
    pub subscription_key: SecretString,
    /// `sandbox` or the production environment name, e.g. `mtnzambia`
    pub target_environment: String,
    pub timeout: Duration,
}

impl MtnConfig {
    pub fn new(
        api_user: impl Into<String>,
        api_key: SecretString,
        subscription_key: SecretString,
    ) -> Self {
        Self {
            base_url: DEFAULT_MTN_BASE_URL.to_string(),
            api_user: api_user.into(),
            api_key,
            subscription_key,
            target_environment: "sandbox".to_string(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct RequestToPayStatus {
    status: String,
}

/// Which MTN product a token is scoped to
#[derive(Debug, Clone, Copy)]
enum Product {
    Collection,
    Disbursement,
}

impl Product {
    fn path(&self) -> &'static str {
        match self {
            Product::Collection => "collection",
            Product::Disbursement => "disbursement",
        }
    }
}

pub struct MtnProvider {
    http_client: Client,
    config: MtnConfig,
    collection_token: TokenCache,
    disbursement_token: TokenCache,
}

impl MtnProvider {
    pub fn new(config: MtnConfig) -> Result<Self, AppError> {
        Ok(Self {
            http_client: build_http_client(config.timeout)?,
            config,
            collection_token: TokenCache::default(),
            disbursement_token: TokenCache::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn cache(&self, product: Product) -> &TokenCache {
        match product {
            Product::Collection => &self.collection_token,
            Product::Disbursement => &self.disbursement_token,
        }
    }

    async fn token(&self, product: Product) -> Result<String, AppError> {
        self.cache(product)
            .get_or_refresh(|| self.fetch_token(product))
            .await
    }

    async fn fetch_token(&self, product: Product) -> Result<(SecretString, Duration), AppError> {
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.config.api_user,
            self.config.api_key.expose_secret()
        ));
        let url = self.url(&format!("/{}/token/", product.path()));
        debug!(url = %url, "Requesting MTN access token");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Basic {}", credentials))
            .header(
                "Ocp-Apim-Subscription-Key",
                self.config.subscription_key.expose_secret(),
            )
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("MTN token: {}", e))
                } else {
                    ProviderError::Unavailable(format!("MTN token: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::Auth(format!("MTN token endpoint returned HTTP {}", status)).into());
        }

        let token: TokenResponse = decode(Provider::Mtn, response).await?;
        Ok((
            SecretString::from(token.access_token),
            Duration::from_secs(token.expires_in),
        ))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(token)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(
                "Ocp-Apim-Subscription-Key",
                self.config.subscription_key.expose_secret(),
            )
    }
}

#[async_trait]
impl PaymentProvider for MtnProvider {
    fn provider(&self) -> Provider {
        Provider::Mtn
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.token(Product::Collection).await.map(|_| ())
    }

    #[instrument(skip(self, request), fields(provider = "MTN", reference = %request.reference))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<GatewayOutcome<String>, AppError> {
        let token = self.token(Product::Collection).await?;
        let reference_id = Uuid::new_v4().to_string();

        let builder = self
            .http_client
            .post(self.url("/collection/v1_0/requesttopay"))
            .header("X-Reference-Id", &reference_id)
            .json(&json!({
                "amount": request.amount.to_string(),
                "currency": request.currency,
                "externalId": request.reference,
                "payer": {
                    "partyIdType": "MSISDN",
                    "partyId": request.phone_number,
                },
                "payerMessage": format!("Payment {}", request.reference),
                "payeeNote": request.reference,
            }));

        let response = match dispatch(Provider::Mtn, self.authorized(builder, &token)).await? {
            Dispatch::Response(r) => r,
            Dispatch::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::CREATED => {
                info!(reference_id = %reference_id, "MTN accepted request to pay");
                Ok(GatewayOutcome::Success(reference_id))
            }
            StatusCode::UNAUTHORIZED => {
                self.collection_token.invalidate().await;
                Ok(GatewayOutcome::Failure(rejection(Provider::Mtn, response).await))
            }
            _ => Ok(GatewayOutcome::Failure(rejection(Provider::Mtn, response).await)),
        }
    }

    #[instrument(skip(self), fields(provider = "MTN"))]
    async fn check_status(
        &self,
        provider_reference: &str,
    ) -> Result<GatewayOutcome<ProviderStatus>, AppError> {
        let token = self.token(Product::Collection).await?;
        let builder = self.http_client.get(self.url(&format!(
            "/collection/v1_0/requesttopay/{}",
            provider_reference
        )));

        let response = match dispatch(Provider::Mtn, self.authorized(builder, &token)).await? {
            Dispatch::Response(r) => r,
            Dispatch::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };

        match response.status() {
            StatusCode::NOT_FOUND => Ok(GatewayOutcome::Success(ProviderStatus::NotFound)),
            s if s.is_success() => {
                let body: RequestToPayStatus = decode(Provider::Mtn, response).await?;
                Ok(GatewayOutcome::Success(self.map_status(&body.status)))
            }
            StatusCode::UNAUTHORIZED => {
                self.collection_token.invalidate().await;
                Ok(GatewayOutcome::Failure(rejection(Provider::Mtn, response).await))
            }
            _ => Ok(GatewayOutcome::Failure(rejection(Provider::Mtn, response).await)),
        }
    }

    #[instrument(skip(self), fields(provider = "MTN"))]
    async fn refund(
        &self,
        provider_reference: &str,
        refund_reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayOutcome<String>, AppError> {
        let token = self.token(Product::Disbursement).await?;
        // MTN rejects a second request under the same reference id.
        let refund_id = refund_reference.to_string();

        let builder = self
            .http_client
            .post(self.url("/disbursement/v1_0/refund"))
            .header("X-Reference-Id", &refund_id)
            .json(&json!({
                "amount": amount.to_string(),
                "currency": currency,
                "externalId": provider_reference,
                "payerMessage": "Refund",
                "payeeNote": provider_reference,
                "referenceIdToRefund": provider_reference,
            }));

        let response = match dispatch(Provider::Mtn, self.authorized(builder, &token)).await? {
            Dispatch::Response(r) => r,
            Dispatch::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };

        if response.status().is_success() {
            info!(refund_id = %refund_id, "MTN accepted refund");
            return Ok(GatewayOutcome::Success(refund_id));
        }
        if response.status() == StatusCode::CONFLICT {
            info!(refund_id = %refund_id, "MTN already holds this refund");
            return Ok(GatewayOutcome::Success(refund_id));
        }
        if response.status() == StatusCode::UNAUTHORIZED {
            self.disbursement_token.invalidate().await;
        }
        Ok(GatewayOutcome::Failure(rejection(Provider::Mtn, response).await))
    }

    /// Unknown values carry no state.
    fn map_status(&self, raw: &str) -> ProviderStatus {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESSFUL" | "SUCCESS" => ProviderStatus::Completed,
            "FAILED" | "REJECTED" => ProviderStatus::Failed,
            "TIMEOUT" | "EXPIRED" => ProviderStatus::Expired,
            "PENDING" | "ONGOING" => ProviderStatus::Pending,
            _ => ProviderStatus::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MtnProvider {
        MtnProvider::new(MtnConfig::new(
            "user",
            SecretString::from("key"),
            SecretString::from("sub"),
        ))
        .unwrap()
    }

    #[test]
    fn test_status_vocabulary() {
        let mtn = provider();
        assert_eq!(mtn.map_status("SUCCESSFUL"), ProviderStatus::Completed);
        assert_eq!(mtn.map_status("successful"), ProviderStatus::Completed);
        assert_eq!(mtn.map_status("FAILED"), ProviderStatus::Failed);
        assert_eq!(mtn.map_status("REJECTED"), ProviderStatus::Failed);
        assert_eq!(mtn.map_status("TIMEOUT"), ProviderStatus::Expired);
        assert_eq!(mtn.map_status("PENDING"), ProviderStatus::Pending);
        assert_eq!(mtn.map_status("WHATEVER"), ProviderStatus::NotFound);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let mut config = MtnConfig::new("u", SecretString::from("k"), SecretString::from("s"));
        config.base_url = "http://localhost:9000/".to_string();
        let mtn = MtnProvider::new(config).unwrap();
        assert_eq!(
            mtn.url("/collection/token/"),
            "http://localhost:9000/collection/token/"
        );
    }
}
