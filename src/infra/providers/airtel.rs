//! Airtel Money adapter (Africa Open API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, GatewayOutcome, InitiateRequest, PaymentProvider, Provider, ProviderError,
    ProviderStatus,
};

use super::token::TokenCache;
use super::{DEFAULT_PROVIDER_TIMEOUT, Dispatch, build_http_client, decode, dispatch, rejection};

/// Default Airtel Open API staging base URL
pub const DEFAULT_AIRTEL_BASE_URL: &str = "https://openapiuat.airtel.africa";

#[derive(Debug)]
pub struct AirtelConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// ISO 3166 alpha-2 country code sent as `X-Country`
    pub country: String,
    /// Default `X-Currency` for calls that carry no amount
    pub currency: String,
    pub timeout: Duration,
}

impl AirtelConfig {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            base_url: DEFAULT_AIRTEL_BASE_URL.to_string(),
            client_id: client_id.into(),
            client_secret,
            country: "ZM".to_string(),
            currency: "ZMW".to_string(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Airtel sends this as a string in some environments
    expires_in: serde_json::Value,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let secs = match &self.expires_in {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        };
        Duration::from_secs(secs.unwrap_or(180))
    }
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiTransaction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    airtel_money_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiData {
    #[serde(default)]
    transaction: ApiTransaction,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: ApiData,
    status: ApiStatus,
}

impl ApiResponse {
    fn failure_reason(&self) -> String {
        self.status
            .message
            .clone()
            .unwrap_or_else(|| "AIRTEL reported failure".to_string())
    }
}

/// What an authorized call produced
enum Reply {
    Body(ApiResponse),
    NotFound,
    Failure(String),
    Indeterminate(String),
}

pub struct AirtelProvider {
    http_client: Client,
    config: AirtelConfig,
    token: TokenCache,
}

impl AirtelProvider {
    pub fn new(config: AirtelConfig) -> Result<Self, AppError> {
        Ok(Self {
            http_client: build_http_client(config.timeout)?,
            config,
            token: TokenCache::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, AppError> {
        self.token.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> Result<(SecretString, Duration), AppError> {
        let url = self.url("/auth/oauth2/token");
        debug!(url = %url, "Requesting Airtel access token");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret.expose_secret(),
                "grant_type": "client_credentials",
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("AIRTEL token: {}", e))
                } else {
                    ProviderError::Unavailable(format!("AIRTEL token: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(
                ProviderError::Auth(format!("AIRTEL token endpoint returned HTTP {}", status)).into(),
            );
        }

        let token: TokenResponse = decode(Provider::Airtel, response).await?;
        let lifetime = token.lifetime();
        Ok((SecretString::from(token.access_token), lifetime))
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
        currency: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(token)
            .header("X-Country", &self.config.country)
            .header("X-Currency", currency)
    }

    /// Send an authorized call; 401 drops the cached token
    async fn call(&self, builder: reqwest::RequestBuilder) -> Result<Reply, AppError> {
        let response = match dispatch(Provider::Airtel, builder).await? {
            Dispatch::Response(r) => r,
            Dispatch::Indeterminate(reason) => return Ok(Reply::Indeterminate(reason)),
        };
        match response.status() {
            s if s.is_success() => Ok(Reply::Body(decode(Provider::Airtel, response).await?)),
            StatusCode::UNAUTHORIZED => {
                self.token.invalidate().await;
                Ok(Reply::Failure(rejection(Provider::Airtel, response).await))
            }
            StatusCode::NOT_FOUND => Ok(Reply::NotFound),
            _ => Ok(Reply::Failure(rejection(Provider::Airtel, response).await)),
        }
    }
}

#[async_trait]
impl PaymentProvider for AirtelProvider {
    fn provider(&self) -> Provider {
        Provider::Airtel
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.access_token().await.map(|_| ())
    }

    #[instrument(skip(self, request), fields(provider = "AIRTEL", reference = %request.reference))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<GatewayOutcome<String>, AppError> {
        let token = self.access_token().await?;
        let builder = self.http_client.post(self.url("/merchant/v1/payments/")).json(&json!({
            "reference": request.reference,
            "subscriber": {
                "country": self.config.country,
                "currency": request.currency,
                "msisdn": request.phone_number,
            },
            "transaction": {
                "amount": request.amount,
                "country": self.config.country,
                "currency": request.currency,
                "id": request.reference,
            },
        }));

        let body = match self
            .call(self.authorized(builder, &token, &request.currency))
            .await?
        {
            Reply::Body(body) => body,
            Reply::NotFound => {
                return Ok(GatewayOutcome::Failure("AIRTEL payments endpoint not found".into()));
            }
            Reply::Failure(reason) => return Ok(GatewayOutcome::Failure(reason)),
            Reply::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };
        if !body.status.success {
            return Ok(GatewayOutcome::Failure(body.failure_reason()));
        }

        // Enquiries are keyed by the transaction id we sent.
        let reference = body
            .data
            .transaction
            .id
            .unwrap_or_else(|| request.reference.clone());
        info!(provider_reference = %reference, "Airtel accepted collection");
        Ok(GatewayOutcome::Success(reference))
    }

    #[instrument(skip(self), fields(provider = "AIRTEL"))]
    async fn check_status(
        &self,
        provider_reference: &str,
    ) -> Result<GatewayOutcome<ProviderStatus>, AppError> {
        let token = self.access_token().await?;
        let builder = self
            .http_client
            .get(self.url(&format!("/standard/v1/payments/{}", provider_reference)));

        let body = match self
            .call(self.authorized(builder, &token, &self.config.currency))
            .await?
        {
            Reply::Body(body) => body,
            Reply::NotFound => return Ok(GatewayOutcome::Success(ProviderStatus::NotFound)),
            Reply::Failure(reason) => return Ok(GatewayOutcome::Failure(reason)),
            Reply::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };

        let Some(status) = body.data.transaction.status.as_deref() else {
            warn!("Airtel status response without transaction status");
            return Err(ProviderError::MalformedResponse(
                "AIRTEL status response missing transaction status".to_string(),
            )
            .into());
        };
        Ok(GatewayOutcome::Success(self.map_status(status)))
    }

    /// Airtel keys refunds by the collection's money id and takes no client reference,
    /// so `refund_reference` only tags the logs.
    #[instrument(skip(self), fields(provider = "AIRTEL"))]
    async fn refund(
        &self,
        provider_reference: &str,
        refund_reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayOutcome<String>, AppError> {
        let token = self.access_token().await?;
        let builder = self
            .http_client
            .post(self.url("/standard/v1/payments/refund"))
            .json(&json!({
                "transaction": {
                    "airtel_money_id": provider_reference,
                    "amount": amount,
                },
            }));

        let body = match self.call(self.authorized(builder, &token, currency)).await? {
            Reply::Body(body) => body,
            Reply::NotFound => {
                return Ok(GatewayOutcome::Failure(format!(
                    "AIRTEL does not know transaction {}",
                    provider_reference
                )));
            }
            Reply::Failure(reason) => return Ok(GatewayOutcome::Failure(reason)),
            Reply::Indeterminate(reason) => return Ok(GatewayOutcome::Indeterminate(reason)),
        };
        if !body.status.success {
            return Ok(GatewayOutcome::Failure(body.failure_reason()));
        }
        let refund_reference = body
            .data
            .transaction
            .airtel_money_id
            .unwrap_or_else(|| provider_reference.to_string());
        info!(refund_reference = %refund_reference, "Airtel accepted refund");
        Ok(GatewayOutcome::Success(refund_reference))
    }

    /// Transaction status codes. Unknown values carry no state.
    fn map_status(&self, raw: &str) -> ProviderStatus {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TS" | "SUCCESS" | "SUCCESSFUL" => ProviderStatus::Completed,
            "TF" | "FAILED" => ProviderStatus::Failed,
            "TA" | "TIP" | "PENDING" | "IN PROGRESS" => ProviderStatus::Pending,
            "TE" | "EXPIRED" => ProviderStatus::Expired,
            _ => ProviderStatus::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let airtel =
            AirtelProvider::new(AirtelConfig::new("client", SecretString::from("secret"))).unwrap();
        assert_eq!(airtel.map_status("TS"), ProviderStatus::Completed);
        assert_eq!(airtel.map_status("TF"), ProviderStatus::Failed);
        assert_eq!(airtel.map_status("TIP"), ProviderStatus::Pending);
        assert_eq!(airtel.map_status("TA"), ProviderStatus::Pending);
        assert_eq!(airtel.map_status("TE"), ProviderStatus::Expired);
        assert_eq!(airtel.map_status("??"), ProviderStatus::NotFound);
    }

    #[test]
    fn test_token_lifetime_accepts_string_or_number() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"3600"}"#).unwrap();
        assert_eq!(token.lifetime(), Duration::from_secs(3600));
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":180}"#).unwrap();
        assert_eq!(token.lifetime(), Duration::from_secs(180));
    }
}
