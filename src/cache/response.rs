//! Two-tier response cache for successful completions.
//!
//! Reads go to the moka fast tier first, then to the durable
//! [`CacheStore`]. A durable hit is promoted into the fast tier. Every hit
//! increments the entry's hit count through the store's atomic
//! `record_hit` and refreshes `last_accessed`.
//!
//! Expiry is judged against the gateway [`Clock`], not moka's own timer:
//! an entry with `expires_at <= now` is removed from both tiers on access
//! and reported as a miss. moka's TTL only bounds memory.
//!
//! Cache failures never fail a request. Store errors are logged and the
//! lookup degrades to a miss (or the write is skipped).

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CacheEntry, Fingerprint};
use crate::Result;
use crate::clock::Clock;
use crate::store::CacheStore;
use crate::telemetry;
use crate::types::Provider;

/// Configuration for the response cache.
///
/// ```rust
/// # use heimdall::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether completions are cached at all. Default: true.
    pub enabled: bool,
    /// Maximum number of entries in the fast tier. Default: 10,000.
    pub max_entries: u64,
    /// Time-to-live applied to every entry. Default: 1 hour.
    #[serde(with = "crate::config::duration_secs")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the maximum number of fast-tier entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::days(36_500))
    }
}

/// Response cache over a moka fast tier and a durable [`CacheStore`].
pub struct ResponseCache {
    fast: Cache<String, CacheEntry>,
    durable: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(durable: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let fast = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self {
            fast,
            durable,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, counting the hit.
    ///
    /// Returns `None` on a miss, for expired entries, and when caching is disabled.
    pub async fn get(&self, provider: Provider, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }
        let now = self.clock.now();
        let key = fingerprint.as_str();

        let (entry, tier) = match self.fast.get(key).await {
            Some(entry) => (entry, "fast"),
            None => match self.durable.get(key).await {
                Ok(Some(entry)) => (entry, "durable"),
                Ok(None) => return self.miss(provider, fingerprint),
                Err(e) => {
                    warn!(fingerprint = fingerprint.short(), error = %e, "durable cache read failed");
                    return self.miss(provider, fingerprint);
                }
            },
        };

        if entry.is_expired(now) {
            self.fast.invalidate(key).await;
            if let Err(e) = self.durable.remove(key).await {
                warn!(fingerprint = fingerprint.short(), error = %e, "failed to remove expired entry");
            }
            return self.miss(provider, fingerprint);
        }

        let entry = match self.durable.record_hit(key, now).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                // Gone from the durable tier; write the fast copy back.
                let mut entry = entry;
                entry.hit_count += 1;
                entry.last_accessed = now;
                if let Err(e) = self.durable.put(entry.clone()).await {
                    warn!(fingerprint = fingerprint.short(), error = %e, "failed to restore cache entry");
                }
                entry
            }
            Err(e) => {
                warn!(fingerprint = fingerprint.short(), error = %e, "failed to record cache hit");
                let mut entry = entry;
                entry.hit_count += 1;
                entry.last_accessed = now;
                entry
            }
        };
        self.fast.insert(key.to_string(), entry.clone()).await;

        metrics::counter!(telemetry::CACHE_HITS_TOTAL,
            "provider" => entry.provider.as_str(),
            "tier" => tier,
        )
        .increment(1);
        debug!(fingerprint = fingerprint.short(), tier, hits = entry.hit_count, "cache hit");
        Some(entry)
    }

    /// Store a fresh successful response in both tiers.
    pub async fn put(&self, entry: CacheEntry) {
        if !self.config.enabled {
            return;
        }
        self.fast.insert(entry.fingerprint.clone(), entry.clone()).await;
        if let Err(e) = self.durable.put(entry).await {
            warn!(error = %e, "durable cache write failed");
        }
    }

    /// TTL as a chrono duration, for building entries.
    pub fn ttl(&self) -> chrono::Duration {
        self.config.chrono_ttl()
    }

    /// Remove entries for `provider`, or all entries. Returns the durable count removed.
    pub async fn clear(&self, provider: Option<Provider>) -> Result<usize> {
        match provider {
            None => self.fast.invalidate_all(),
            Some(provider) => {
                let keys: Vec<String> = self
                    .fast
                    .iter()
                    .filter(|(_, entry)| entry.provider == provider)
                    .map(|(key, _)| key.as_ref().clone())
                    .collect();
                for key in keys {
                    self.fast.invalidate(&key).await;
                }
            }
        }
        self.durable.clear(provider).await
    }

    /// Drop expired entries from the durable tier.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.fast.run_pending_tasks().await;
        self.durable.purge_expired(self.clock.now()).await
    }

    fn miss(&self, provider: Provider, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
            "provider" => provider.as_str(),
        )
        .increment(1);
        debug!(fingerprint = fingerprint.short(), "cache miss");
        None
    }
}
