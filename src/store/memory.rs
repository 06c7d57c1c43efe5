//! In-process store implementing every persistence trait.
//!
//! Each record family sits behind its own mutex, so cache traffic never
//! waits on quota updates. No lock is held across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BreakerStore, CacheStore, QuotaStore, UsageLogStore, WindowStore};
use crate::Result;
use crate::cache::CacheEntry;
use crate::circuit::{BreakerKey, CircuitBreakerRecord};
use crate::quota::QuotaRecord;
use crate::rate_limit::{RateLimitWindow, SlideOutcome, WindowKey};
use crate::types::{Provider, UsageLogEntry, UsageQuery};

type RowKey = (WindowKey, DateTime<Utc>);

/// Thread-safe in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cache: Mutex<HashMap<String, CacheEntry>>,
    sliding: Mutex<HashMap<WindowKey, VecDeque<DateTime<Utc>>>>,
    rows: Mutex<HashMap<RowKey, RateLimitWindow>>,
    breakers: Mutex<HashMap<BreakerKey, CircuitBreakerRecord>>,
    quotas: Mutex<HashMap<(String, Provider), QuotaRecord>>,
    usage: Mutex<Vec<UsageLogEntry>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of durable cache entries, expired or not.
    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Number of usage log rows.
    pub fn usage_len(&self) -> usize {
        lock(&self.usage).len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        Ok(lock(&self.cache).get(fingerprint).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        lock(&self.cache).insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn record_hit(
        &self,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let mut cache = lock(&self.cache);
        Ok(cache.get_mut(fingerprint).map(|entry| {
            entry.hit_count += 1;
            entry.last_accessed = at;
            entry.clone()
        }))
    }

    async fn remove(&self, fingerprint: &str) -> Result<()> {
        lock(&self.cache).remove(fingerprint);
        Ok(())
    }

    async fn clear(&self, provider: Option<Provider>) -> Result<usize> {
        let mut cache = lock(&self.cache);
        let before = cache.len();
        match provider {
            Some(provider) => cache.retain(|_, entry| entry.provider != provider),
            None => cache.clear(),
        }
        Ok(before - cache.len())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut cache = lock(&self.cache);
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired(now));
        Ok(before - cache.len())
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn slide(&self, key: &WindowKey, now: DateTime<Utc>, limit: u32) -> Result<SlideOutcome> {
        let cutoff = now - key.window.length();
        let mut sliding = lock(&self.sliding);
        let stamps = sliding.entry(key.clone()).or_default();

        while stamps.front().is_some_and(|t| *t <= cutoff) {
            stamps.pop_front();
        }
        let count = u32::try_from(stamps.len()).unwrap_or(u32::MAX);
        let oldest = stamps.front().copied();
        let allowed = count < limit;
        if allowed {
            stamps.push_back(now);
        }
        Ok(SlideOutcome {
            allowed,
            count,
            oldest,
        })
    }

    async fn record_window(
        &self,
        key: &WindowKey,
        window_start: DateTime<Utc>,
        tokens: u64,
    ) -> Result<RateLimitWindow> {
        let mut rows = lock(&self.rows);
        let row = rows
            .entry((key.clone(), window_start))
            .or_insert_with(|| RateLimitWindow {
                identity: key.identity.clone(),
                provider: key.provider,
                window: key.window,
                window_start,
                request_count: 0,
                token_count: 0,
            });
        row.request_count += 1;
        row.token_count += tokens;
        Ok(row.clone())
    }

    async fn get_window(
        &self,
        key: &WindowKey,
        window_start: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>> {
        Ok(lock(&self.rows).get(&(key.clone(), window_start)).cloned())
    }

    async fn purge_windows(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        {
            let mut sliding = lock(&self.sliding);
            for (key, stamps) in sliding.iter_mut() {
                let cutoff = now - key.window.length();
                while stamps.front().is_some_and(|t| *t <= cutoff) {
                    stamps.pop_front();
                    removed += 1;
                }
            }
            sliding.retain(|_, stamps| !stamps.is_empty());
        }
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|(key, start), _| *start + key.window.length() > now);
        Ok(removed + (before - rows.len()))
    }
}

#[async_trait]
impl BreakerStore for MemoryStore {
    async fn load_breaker(&self, key: &BreakerKey) -> Result<Option<CircuitBreakerRecord>> {
        Ok(lock(&self.breakers).get(key).cloned())
    }

    async fn save_breaker(&self, record: &CircuitBreakerRecord) -> Result<()> {
        lock(&self.breakers).insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn list_breakers(&self) -> Result<Vec<CircuitBreakerRecord>> {
        let mut records: Vec<_> = lock(&self.breakers).values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn load_quota(&self, identity: &str, provider: Provider) -> Result<Option<QuotaRecord>> {
        Ok(lock(&self.quotas)
            .get(&(identity.to_string(), provider))
            .cloned())
    }

    async fn save_quota(&self, record: &QuotaRecord) -> Result<()> {
        lock(&self.quotas).insert((record.identity.clone(), record.provider), record.clone());
        Ok(())
    }

    async fn list_quotas(&self) -> Result<Vec<QuotaRecord>> {
        Ok(lock(&self.quotas).values().cloned().collect())
    }
}

#[async_trait]
impl UsageLogStore for MemoryStore {
    async fn append(&self, entry: UsageLogEntry) -> Result<()> {
        lock(&self.usage).push(entry);
        Ok(())
    }

    async fn query(&self, query: &UsageQuery) -> Result<Vec<UsageLogEntry>> {
        let mut rows: Vec<_> = lock(&self.usage)
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateWindow;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn slide_drops_entries_at_the_cutoff() {
        let store = MemoryStore::new();
        let key = WindowKey::new("user:1", Provider::Claude, RateWindow::Minute);
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        assert!(store.slide(&key, t0, 1).await.unwrap().allowed);
        let rejected = store.slide(&key, t0 + Duration::seconds(59), 1).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.oldest, Some(t0));

        assert!(store.slide(&key, t0 + Duration::seconds(60), 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn record_window_accumulates_per_start() {
        let store = MemoryStore::new();
        let key = WindowKey::new("session:s", Provider::OpenAi, RateWindow::Hour);
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();

        store.record_window(&key, start, 100).await.unwrap();
        let row = store.record_window(&key, start, 50).await.unwrap();
        assert_eq!(row.request_count, 2);
        assert_eq!(row.token_count, 150);

        let removed = store.purge_windows(start + Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_window(&key, start).await.unwrap().is_none());
    }
}
