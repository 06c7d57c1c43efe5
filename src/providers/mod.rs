//! Upstream provider adapters.
//!
//! - [`ProviderAdapter`]: the trait every upstream implements.
//! - [`ProviderRegistry`]: lookup table from [`Provider`](crate::Provider) to adapter.
//! - [`with_retry`]: bounded, timed retries of transient failures.
//! - [`TokenPricing`]: per-model cost calculation.
//!
//! HTTP adapters sit behind cargo features: `claude` for [`ClaudeAdapter`]
//! and `openai` for [`OpenAiAdapter`].

#[cfg(feature = "claude")]
pub mod claude;
#[cfg(any(feature = "claude", feature = "openai"))]
mod http;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pricing;
pub mod registry;
pub mod retry;
pub mod traits;

#[cfg(feature = "claude")]
pub use claude::ClaudeAdapter;
#[cfg(feature = "openai")]
pub use openai::OpenAiAdapter;
pub use pricing::TokenPricing;
pub use registry::ProviderRegistry;
pub use retry::{RetryConfig, with_retry};
pub use traits::{DEFAULT_TEMPERATURE, ProviderAdapter, TokenLimits};
