//! The provider adapter interface.
//!
//! One implementation per upstream provider. The gateway selects an
//! adapter through the [`ProviderRegistry`](super::ProviderRegistry) and
//! never sees provider-specific request or response shapes.

use async_trait::async_trait;

use super::pricing::TokenPricing;
use crate::Result;
use crate::types::{ChatCompletion, ChatRequest, Message, NormalizedRequest, Provider};

/// Token bounds applied during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLimits {
    /// Used when the request leaves `max_tokens` unset. Default: 1000.
    pub default_max_tokens: u32,
    /// Hard upper bound. Default: 4096.
    pub max_tokens_ceiling: u32,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            default_max_tokens: 1000,
            max_tokens_ceiling: 4096,
        }
    }
}

/// Default sampling temperature when the request does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Adapter between the gateway's normalized request and one upstream API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Model used when the request names none.
    fn default_model(&self) -> &str;

    /// Inclusive temperature bounds accepted upstream.
    fn temperature_range(&self) -> (f64, f64);

    /// Rates used to price calls to `model`.
    fn pricing(&self, model: &str) -> TokenPricing {
        TokenPricing::for_model(self.provider(), model)
    }

    /// Resolve model, token ceiling and temperature for a validated request.
    fn normalize(
        &self,
        request: &ChatRequest,
        messages: Vec<Message>,
        limits: TokenLimits,
    ) -> NormalizedRequest {
        let requested = request
            .max_tokens
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(limits.default_max_tokens);
        let (lo, hi) = self.temperature_range();

        NormalizedRequest {
            provider: self.provider(),
            model: request
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.default_model().to_string()),
            messages,
            max_tokens: requested.clamp(1, limits.max_tokens_ceiling.max(1)),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE).clamp(lo, hi),
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        }
    }

    /// Perform one upstream call.
    async fn send(&self, request: &NormalizedRequest) -> Result<ChatCompletion>;
}
