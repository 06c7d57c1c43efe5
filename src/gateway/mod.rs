//! The gateway orchestrator.
//!
//! [`Gateway`] composes the security classifier, rate limiter, response
//! cache, circuit breakers, quota manager and provider adapters into one
//! request pipeline ([`Gateway::chat`]) plus a set of administrative
//! operations. Build one with [`Heimdall::builder()`].
//!
//! The gateway holds no request-scoped mutable state. Share it between
//! tasks behind an `Arc`.

mod admin;
mod builder;
mod pipeline;

pub use admin::{
    DailyUsage, ProviderStatus, ProviderUsage, QuotaStatus, SweepReport, UsageAnalytics,
};
pub use builder::{Heimdall, HeimdallBuilder};
pub use pipeline::GatewayReply;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::circuit::CircuitBreakerRegistry;
use crate::clock::Clock;
use crate::providers::{ProviderRegistry, RetryConfig, TokenLimits};
use crate::quota::QuotaManager;
use crate::rate_limit::RateLimiter;
use crate::security::SecurityClassifier;
use crate::store::UsageLogStore;

/// Pipeline-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout for each upstream attempt. Default: 30s.
    #[serde(with = "crate::config::duration_secs")]
    pub provider_timeout: Duration,
    /// `max_tokens` used when a request sets none. Default: 1000.
    pub default_max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            default_max_tokens: 1000,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn default_max_tokens(mut self, n: u32) -> Self {
        self.default_max_tokens = n;
        self
    }
}

/// The assembled request gateway.
pub struct Gateway {
    security: SecurityClassifier,
    limiter: RateLimiter,
    cache: ResponseCache,
    breakers: CircuitBreakerRegistry,
    quotas: QuotaManager,
    providers: ProviderRegistry,
    usage: Arc<dyn UsageLogStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    config: GatewayConfig,
}

impl Gateway {
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn security(&self) -> &SecurityClassifier {
        &self.security
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn quotas(&self) -> &QuotaManager {
        &self.quotas
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn token_limits(&self) -> TokenLimits {
        TokenLimits {
            default_max_tokens: self.config.default_max_tokens,
            max_tokens_ceiling: self.security.config().max_tokens_ceiling,
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
