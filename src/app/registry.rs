//! Lookup of configured provider adapters.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{AppError, PaymentProvider, Provider, ProviderError};

/// Adapters keyed by the operator they serve
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the provider it reports (builder pattern)
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentProvider>, AppError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| AppError::Provider(ProviderError::NotConfigured(provider.to_string())))
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn PaymentProvider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
