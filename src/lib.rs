//! Heimdall - admission-controlled gateway for chat-completion AI providers
//!
//! Every request passes through one pipeline before it may reach an
//! upstream provider: client and structural validation, threat
//! classification, sliding-window rate limiting, a response cache, a
//! per-provider circuit breaker and a per-user spend quota. Every outcome,
//! rejections included, lands in an append-only usage log.
//!
//! # Example
//!
//! ```rust,no_run
//! use heimdall::{CallerIdentity, ChatRequest, ClientMeta, Heimdall, Provider, Role};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let gateway = Heimdall::builder()
//!         .claude("sk-ant-your-key")
//!         .build()?;
//!
//!     let request = ChatRequest::new(Provider::Claude, CallerIdentity::user("u-42"))
//!         .message(Role::User, "What is the capital of France?")
//!         .max_tokens(200);
//!
//!     let reply = gateway
//!         .chat(request, &ClientMeta::new(), &CancellationToken::new())
//!         .await?;
//!
//!     println!("{} (${:.6})", reply.completion.content, reply.cost_usd);
//!     Ok(())
//! }
//! ```
//!
//! State lives behind the async traits in [`store`]; the bundled
//! [`MemoryStore`] keeps it in-process.

pub mod cache;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod quota;
pub mod rate_limit;
pub mod security;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use error::{HeimdallError, QuotaPeriod, Result};
pub use gateway::{
    DailyUsage, Gateway, GatewayConfig, GatewayReply, Heimdall, HeimdallBuilder, ProviderStatus,
    ProviderUsage, QuotaStatus, SweepReport, UsageAnalytics,
};

// Component configuration
pub use cache::CacheConfig;
pub use circuit::{BreakerConfig, BreakerState};
pub use config::{Config, Secrets};
pub use providers::RetryConfig;
pub use quota::QuotaConfig;
pub use rate_limit::{RateLimitConfig, RateWindow};
pub use security::SecurityConfig;

pub use clock::{Clock, ManualClock, SystemClock};
pub use providers::{ProviderAdapter, TokenPricing};
pub use store::{GatewayStore, MemoryStore};

// Re-export all types
pub use types::{
    CallerIdentity, ChatCompletion, ChatRequest, ClientMeta, ErrorBody, GatewayResponse,
    InboundMessage, Message, NormalizedRequest, Provider, RequestStatus, Role, ThreatLevel, Usage,
    UsageLogEntry, UsageQuery,
};
