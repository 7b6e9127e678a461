//! Cached short-lived provider access tokens.

use std::future::Future;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::AppError;

/// Tokens are refreshed this long before they actually expire
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

/// Holds one bearer token and refreshes it on demand.
///
/// Concurrent callers that find the token stale serialize on the write lock, so
/// only one of them hits the token endpoint.
pub struct TokenCache {
    token: RwLock<Option<CachedToken>>,
    refresh_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

impl TokenCache {
    #[must_use]
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            token: RwLock::new(None),
            refresh_margin,
        }
    }

    /// Margin applied to a token of the given lifetime, at most half of it
    fn effective_margin(&self, lifetime: Duration) -> Duration {
        self.refresh_margin.min(lifetime / 2)
    }

    fn usable(&self, cached: &Option<CachedToken>) -> Option<String> {
        cached
            .as_ref()
            .filter(|t| Instant::now() < t.refresh_at)
            .map(|t| t.value.expose_secret().to_string())
    }

    /// Return the cached token, or call `fetch` for a new `(token, lifetime)` pair
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(SecretString, Duration), AppError>>,
    {
        if let Some(token) = self.usable(&*self.token.read().await) {
            return Ok(token);
        }

        let mut guard = self.token.write().await;
        if let Some(token) = self.usable(&guard) {
            return Ok(token);
        }

        let (value, lifetime) = fetch().await?;
        debug!(lifetime_secs = lifetime.as_secs(), "Provider token refreshed");
        let token = value.expose_secret().to_string();
        *guard = Some(CachedToken {
            value,
            refresh_at: Instant::now() + (lifetime - self.effective_margin(lifetime)),
        });
        Ok(token)
    }

    /// Drop the cached token, e.g. after the provider answered 401
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fetch_counting(
        calls: Arc<AtomicUsize>,
        lifetime: Duration,
    ) -> Result<(SecretString, Duration), AppError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((SecretString::from(format!("token-{}", n)), lifetime))
    }

    #[tokio::test]
    async fn test_token_is_reused_while_fresh() {
        let cache = TokenCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_margin_is_capped_at_half_the_lifetime() {
        let cache = TokenCache::default();
        assert_eq!(cache.effective_margin(Duration::from_secs(3600)), Duration::from_secs(60));
        assert_eq!(cache.effective_margin(Duration::from_secs(120)), Duration::from_secs(60));
        assert_eq!(cache.effective_margin(Duration::from_secs(30)), Duration::from_secs(15));
        assert_eq!(cache.effective_margin(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_short_lived_token_is_still_reused() {
        let cache = TokenCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        // 30s is under the default margin but still good for 15s.
        let first = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(30)))
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let cache = TokenCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::ZERO))
            .await
            .unwrap();
        let token = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();

        assert_eq!(token, "token-2");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = TokenCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();
        cache.invalidate().await;
        let token = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(token, "token-2");
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = TokenCache::default();
        let result = cache
            .get_or_refresh(|| async { Err(AppError::Internal("token endpoint down".into())) })
            .await;
        assert!(result.is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let token = cache
            .get_or_refresh(|| fetch_counting(calls.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(token, "token-1");
    }
}
