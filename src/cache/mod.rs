//! Response caching.
//!
//! - [`fingerprint`]: deterministic digest of a normalized request, used as
//!   the cache key and the usage-log correlation key.
//! - [`response::ResponseCache`]: two-tier cache of successful completions.
//!   A moka in-memory tier answers first; the [`CacheStore`](crate::store::CacheStore)
//!   backend is the durable fallback, and its hits are promoted back into
//!   the fast tier.

pub mod fingerprint;
pub mod response;

pub use fingerprint::{Fingerprint, fingerprint};
pub use response::{CacheConfig, ResponseCache};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatCompletion, NormalizedRequest, Provider};

/// A cached successful completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub provider: Provider,
    pub model: String,
    pub request: NormalizedRequest,
    pub response: ChatCompletion,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Cost of the original upstream call.
    pub cost_usd: f64,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry for a fresh upstream response.
    pub fn new(
        fingerprint: &Fingerprint,
        request: NormalizedRequest,
        response: ChatCompletion,
        cost_usd: f64,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            fingerprint: fingerprint.as_str().to_string(),
            provider: request.provider,
            model: request.model.clone(),
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            request,
            response,
            cost_usd,
            hit_count: 0,
            last_accessed: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: now,
        }
    }

    /// Expired entries must never be served.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
