//! Persistence interface for gateway state.
//!
//! One async trait per record family, each addressed by the record's
//! natural composite key. Every read-modify-write a component needs to be
//! atomic is a single trait method here (`slide`, `record_hit`,
//! `record_window`), so a networked backend can map it onto one atomic
//! primitive. [`MemoryStore`] implements every trait in-process.
//!
//! Implementations report failures as [`HeimdallError::Store`](crate::HeimdallError::Store).

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::cache::CacheEntry;
use crate::circuit::{BreakerKey, CircuitBreakerRecord};
use crate::quota::QuotaRecord;
use crate::rate_limit::{RateLimitWindow, SlideOutcome, WindowKey};
use crate::types::{Provider, UsageLogEntry, UsageQuery};

/// Durable tier of the response cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry for `entry.fingerprint`.
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Atomically increment the hit count and set `last_accessed`.
    ///
    /// Returns the updated entry, or `None` if it no longer exists.
    async fn record_hit(&self, fingerprint: &str, at: DateTime<Utc>)
    -> Result<Option<CacheEntry>>;

    async fn remove(&self, fingerprint: &str) -> Result<()>;

    /// Remove every entry, or only those for `provider`. Returns the count removed.
    async fn clear(&self, provider: Option<Provider>) -> Result<usize>;

    /// Remove entries with `expires_at <= now`. Returns the count removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Sliding-window timestamps and fixed-window usage rows for the rate limiter.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomic sliding-window step.
    ///
    /// Drops timestamps at or before `now - window`, counts the survivors and,
    /// when the count is below `limit`, records `now` and allows.
    async fn slide(&self, key: &WindowKey, now: DateTime<Utc>, limit: u32) -> Result<SlideOutcome>;

    /// Add one request and `tokens` to the fixed-window row starting at `window_start`,
    /// creating it if needed.
    async fn record_window(
        &self,
        key: &WindowKey,
        window_start: DateTime<Utc>,
        tokens: u64,
    ) -> Result<RateLimitWindow>;

    async fn get_window(
        &self,
        key: &WindowKey,
        window_start: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>>;

    /// Drop sliding timestamps and fixed rows whose window has passed.
    async fn purge_windows(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Circuit breaker records.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn load_breaker(&self, key: &BreakerKey) -> Result<Option<CircuitBreakerRecord>>;
    async fn save_breaker(&self, record: &CircuitBreakerRecord) -> Result<()>;
    async fn list_breakers(&self) -> Result<Vec<CircuitBreakerRecord>>;
}

/// Per identity and provider quota records.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load_quota(&self, identity: &str, provider: Provider) -> Result<Option<QuotaRecord>>;
    async fn save_quota(&self, record: &QuotaRecord) -> Result<()>;
    async fn list_quotas(&self) -> Result<Vec<QuotaRecord>>;
}

/// Append-only usage log.
#[async_trait]
pub trait UsageLogStore: Send + Sync {
    async fn append(&self, entry: UsageLogEntry) -> Result<()>;

    /// Entries matching `query`, oldest first.
    async fn query(&self, query: &UsageQuery) -> Result<Vec<UsageLogEntry>>;
}

/// A backend that implements every record family.
pub trait GatewayStore: CacheStore + WindowStore + BreakerStore + QuotaStore + UsageLogStore {}

impl<T> GatewayStore for T where
    T: CacheStore + WindowStore + BreakerStore + QuotaStore + UsageLogStore
{
}
