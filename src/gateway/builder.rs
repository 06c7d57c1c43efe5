//! Builder for configuring gateway instances

use std::sync::Arc;

use tracing::info;

use super::{Gateway, GatewayConfig};
use crate::cache::{CacheConfig, ResponseCache};
use crate::circuit::{BreakerConfig, CircuitBreakerRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Secrets};
use crate::providers::{ProviderAdapter, ProviderRegistry, RetryConfig};
use crate::quota::{QuotaConfig, QuotaManager};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::security::{SecurityClassifier, SecurityConfig};
use crate::store::{
    BreakerStore, CacheStore, GatewayStore, MemoryStore, QuotaStore, UsageLogStore, WindowStore,
};
#[cfg(any(feature = "claude", feature = "openai"))]
use crate::config::ApiProviderConfig;
#[cfg(any(feature = "claude", feature = "openai"))]
use crate::types::Provider;
use crate::{HeimdallError, Result};

/// Main entry point for creating gateway instances.
pub struct Heimdall;

impl Heimdall {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> HeimdallBuilder {
        HeimdallBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// Stores default to one shared [`MemoryStore`] and time to [`SystemClock`].
#[derive(Default)]
pub struct HeimdallBuilder {
    #[cfg(feature = "claude")]
    claude_key: Option<String>,
    #[cfg(feature = "openai")]
    openai_key: Option<String>,
    #[cfg(any(feature = "claude", feature = "openai"))]
    provider_settings: crate::config::ProvidersConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    window_store: Option<Arc<dyn WindowStore>>,
    breaker_store: Option<Arc<dyn BreakerStore>>,
    quota_store: Option<Arc<dyn QuotaStore>>,
    usage_store: Option<Arc<dyn UsageLogStore>>,
    clock: Option<Arc<dyn Clock>>,
    security: SecurityConfig,
    rate_limit: RateLimitConfig,
    cache: CacheConfig,
    circuit_breaker: BreakerConfig,
    quota: QuotaConfig,
    retry: RetryConfig,
    gateway: GatewayConfig,
}

impl HeimdallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded from a resolved configuration and its secrets.
    ///
    /// Providers with an API key (from the secrets file or environment)
    /// are registered.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Self {
        let mut builder = Self::new()
            .security(config.security.clone())
            .rate_limit(config.rate_limit.clone())
            .cache(config.cache.clone())
            .circuit_breaker(config.circuit_breaker.clone())
            .quota(config.quota.clone())
            .retry(config.retry.clone())
            .gateway(config.gateway.clone());

        #[cfg(any(feature = "claude", feature = "openai"))]
        {
            builder.provider_settings = config.providers.clone();
        }
        #[cfg(feature = "claude")]
        if let Some(key) = secrets.api_key(Provider::Claude) {
            builder = builder.claude(key);
        }
        #[cfg(feature = "openai")]
        if let Some(key) = secrets.api_key(Provider::OpenAi) {
            builder = builder.openai(key);
        }
        #[cfg(not(any(feature = "claude", feature = "openai")))]
        let _ = secrets;

        builder
    }

    /// Configure the Anthropic Messages API.
    #[cfg(feature = "claude")]
    pub fn claude(mut self, api_key: impl Into<String>) -> Self {
        self.claude_key = Some(api_key.into());
        self
    }

    /// Configure the OpenAI Chat Completions API.
    #[cfg(feature = "openai")]
    pub fn openai(mut self, api_key: impl Into<String>) -> Self {
        self.openai_key = Some(api_key.into());
        self
    }

    /// Register a custom adapter. Replaces any built-in adapter for the same provider.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Use one backing store for every record family.
    pub fn store<S: GatewayStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.cache_store = Some(store.clone());
        self.window_store = Some(store.clone());
        self.breaker_store = Some(store.clone());
        self.quota_store = Some(store.clone());
        self.usage_store = Some(store);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn window_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.window_store = Some(store);
        self
    }

    pub fn breaker_store(mut self, store: Arc<dyn BreakerStore>) -> Self {
        self.breaker_store = Some(store);
        self
    }

    pub fn quota_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.quota_store = Some(store);
        self
    }

    pub fn usage_store(mut self, store: Arc<dyn UsageLogStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn security(mut self, config: SecurityConfig) -> Self {
        self.security = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn circuit_breaker(mut self, config: BreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn quota(mut self, config: QuotaConfig) -> Self {
        self.quota = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn gateway(mut self, config: GatewayConfig) -> Self {
        self.gateway = config;
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<Gateway> {
        let mut providers = ProviderRegistry::new();

        #[cfg(feature = "claude")]
        if let Some(key) = &self.claude_key {
            use crate::providers::ClaudeAdapter;
            let settings = self.provider_settings.get(Provider::Claude);
            let mut adapter = match settings.and_then(|s| s.base_url.as_deref()) {
                Some(url) => ClaudeAdapter::with_base_url(key.clone(), url),
                None => ClaudeAdapter::new(key.clone()),
            };
            if let Some(model) = default_model(settings) {
                adapter = adapter.with_default_model(model);
            }
            providers.register(Arc::new(adapter));
        }

        #[cfg(feature = "openai")]
        if let Some(key) = &self.openai_key {
            use crate::providers::OpenAiAdapter;
            let settings = self.provider_settings.get(Provider::OpenAi);
            let mut adapter = match settings.and_then(|s| s.base_url.as_deref()) {
                Some(url) => OpenAiAdapter::with_base_url(key.clone(), url),
                None => OpenAiAdapter::new(key.clone()),
            };
            if let Some(model) = default_model(settings) {
                adapter = adapter.with_default_model(model);
            }
            providers.register(Arc::new(adapter));
        }

        for adapter in self.adapters {
            providers.register(adapter);
        }

        if providers.is_empty() {
            return Err(HeimdallError::NoProvider);
        }

        let memory = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache_store = self.cache_store.unwrap_or_else(|| memory.clone());
        let window_store = self.window_store.unwrap_or_else(|| memory.clone());
        let breaker_store = self.breaker_store.unwrap_or_else(|| memory.clone());
        let quota_store = self.quota_store.unwrap_or_else(|| memory.clone());
        let usage_store = self.usage_store.unwrap_or(memory);

        info!(providers = ?providers.providers(), "gateway ready");

        Ok(Gateway {
            security: SecurityClassifier::new(self.security),
            limiter: RateLimiter::new(window_store, clock.clone(), self.rate_limit),
            cache: ResponseCache::new(cache_store, clock.clone(), self.cache),
            breakers: CircuitBreakerRegistry::new(breaker_store, clock.clone(), self.circuit_breaker),
            quotas: QuotaManager::new(quota_store, clock.clone(), self.quota),
            providers,
            usage: usage_store,
            clock,
            retry: self.retry,
            config: self.gateway,
        })
    }
}

#[cfg(any(feature = "claude", feature = "openai"))]
fn default_model(settings: Option<&ApiProviderConfig>) -> Option<String> {
    settings.and_then(|s| s.default_model.clone())
}
