//! Mobile network operator adapters.

pub mod airtel;
pub mod mtn;
pub mod token;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::warn;

use crate::domain::{AppError, ConfigError, Provider, ProviderError};

pub use airtel::{AirtelConfig, AirtelProvider};
pub use mtn::{MtnConfig, MtnProvider};
pub use token::TokenCache;

/// Default bound on any single provider call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of sending one HTTP request to a provider
pub(crate) enum Dispatch {
    /// The provider answered with a non-5xx status
    Response(Response),
    /// Timeout, unreachable host or 5xx; the provider may have acted
    Indeterminate(String),
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        AppError::Config(ConfigError::InvalidValue {
            key: "http_client".to_string(),
            message: e.to_string(),
        })
    })
}

/// Send a request, folding transport-level trouble into an indeterminate result
pub(crate) async fn dispatch(provider: Provider, request: RequestBuilder) -> Result<Dispatch, AppError> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            warn!(%provider, error = %e, "Provider request timed out");
            return Ok(Dispatch::Indeterminate(format!("{} request timed out", provider)));
        }
        Err(e) if e.is_connect() => {
            warn!(%provider, error = %e, "Provider unreachable");
            return Ok(Dispatch::Indeterminate(format!("{} unreachable", provider)));
        }
        Err(e) => return Err(ProviderError::Unavailable(e.to_string()).into()),
    };

    if response.status().is_server_error() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%provider, %status, body = %body, "Provider returned server error");
        return Ok(Dispatch::Indeterminate(format!(
            "{} returned HTTP {}",
            provider,
            status.as_u16()
        )));
    }
    Ok(Dispatch::Response(response))
}

/// Decode a JSON body, treating anything unreadable as a malformed response
pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
    provider: Provider,
    response: Response,
) -> Result<T, AppError> {
    response.json::<T>().await.map_err(|e| {
        AppError::Provider(ProviderError::MalformedResponse(format!(
            "{}: {}",
            provider, e
        )))
    })
}

/// Describe a 4xx answer for a failure result
pub(crate) async fn rejection(provider: Provider, response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(%provider, %status, body = %body, "Provider rejected request");
    if status == StatusCode::UNAUTHORIZED {
        format!("{} rejected credentials", provider)
    } else {
        format!("{} rejected request with HTTP {}: {}", provider, status.as_u16(), body)
    }
}
