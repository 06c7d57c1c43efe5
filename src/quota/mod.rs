//! Per-identity, per-provider spend and request quotas.
//!
//! Daily and monthly counters reset independently and lazily: every
//! access compares the stored reset timestamps against the clock's
//! current UTC date and month. The `is_*_exceeded` flags are recomputed on
//! every update and are only a cache of the comparison.
//!
//! Each (identity, provider) pair is updated under its own async lock so
//! concurrent commits never lose spend. The lock only covers store
//! round-trips, never an upstream call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::QuotaPeriod;
use crate::store::QuotaStore;
use crate::telemetry;
use crate::types::Provider;
use crate::{HeimdallError, Result};

/// Default ceilings applied to newly created quota records.
///
/// ```rust
/// # use heimdall::QuotaConfig;
/// let config = QuotaConfig::new()
///     .daily_limit_usd(5.0)
///     .daily_request_limit(Some(200));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Default: $10.
    pub daily_limit_usd: f64,
    /// Default: $100.
    pub monthly_limit_usd: f64,
    /// Optional daily request ceiling. Default: none.
    pub daily_request_limit: Option<u64>,
    /// Optional monthly request ceiling. Default: none.
    pub monthly_request_limit: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 10.0,
            monthly_limit_usd: 100.0,
            daily_request_limit: None,
            monthly_request_limit: None,
        }
    }
}

impl QuotaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn daily_limit_usd(mut self, usd: f64) -> Self {
        self.daily_limit_usd = usd;
        self
    }

    pub fn monthly_limit_usd(mut self, usd: f64) -> Self {
        self.monthly_limit_usd = usd;
        self
    }

    pub fn daily_request_limit(mut self, n: Option<u64>) -> Self {
        self.daily_request_limit = n;
        self
    }

    pub fn monthly_request_limit(mut self, n: Option<u64>) -> Self {
        self.monthly_request_limit = n;
        self
    }
}

/// Quota state for one identity and provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Identity key (`user:..` or `session:..`).
    pub identity: String,
    pub provider: Provider,
    pub daily_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub daily_spent_usd: f64,
    pub monthly_spent_usd: f64,
    pub daily_request_count: u64,
    pub monthly_request_count: u64,
    #[serde(default)]
    pub daily_request_limit: Option<u64>,
    #[serde(default)]
    pub monthly_request_limit: Option<u64>,
    pub last_daily_reset: DateTime<Utc>,
    pub last_monthly_reset: DateTime<Utc>,
    pub is_daily_exceeded: bool,
    pub is_monthly_exceeded: bool,
}

impl QuotaRecord {
    /// Fresh record with the configured default ceilings.
    pub fn new(identity: impl Into<String>, provider: Provider, config: &QuotaConfig, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            provider,
            daily_limit_usd: config.daily_limit_usd,
            monthly_limit_usd: config.monthly_limit_usd,
            daily_spent_usd: 0.0,
            monthly_spent_usd: 0.0,
            daily_request_count: 0,
            monthly_request_count: 0,
            daily_request_limit: config.daily_request_limit,
            monthly_request_limit: config.monthly_request_limit,
            last_daily_reset: now,
            last_monthly_reset: now,
            is_daily_exceeded: false,
            is_monthly_exceeded: false,
        }
    }

    /// Zero the counters whose period has rolled over. Returns whether anything changed.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if self.last_daily_reset.date_naive() != now.date_naive() {
            self.daily_spent_usd = 0.0;
            self.daily_request_count = 0;
            self.last_daily_reset = now;
            changed = true;
        }
        if (self.last_monthly_reset.year(), self.last_monthly_reset.month())
            != (now.year(), now.month())
        {
            self.monthly_spent_usd = 0.0;
            self.monthly_request_count = 0;
            self.last_monthly_reset = now;
            changed = true;
        }
        if changed {
            self.refresh_flags();
        }
        changed
    }

    /// Recompute the exceeded flags from the counters.
    pub fn refresh_flags(&mut self) {
        self.is_daily_exceeded = self.daily_spent_usd >= self.daily_limit_usd
            || self
                .daily_request_limit
                .is_some_and(|limit| self.daily_request_count >= limit);
        self.is_monthly_exceeded = self.monthly_spent_usd >= self.monthly_limit_usd
            || self
                .monthly_request_limit
                .is_some_and(|limit| self.monthly_request_count >= limit);
    }

    /// The period blocking further calls, daily first.
    pub fn exceeded(&self) -> Option<QuotaPeriod> {
        if self.is_daily_exceeded {
            Some(QuotaPeriod::Daily)
        } else if self.is_monthly_exceeded {
            Some(QuotaPeriod::Monthly)
        } else {
            None
        }
    }

    pub fn daily_remaining_usd(&self) -> f64 {
        (self.daily_limit_usd - self.daily_spent_usd).max(0.0)
    }

    pub fn monthly_remaining_usd(&self) -> f64 {
        (self.monthly_limit_usd - self.monthly_spent_usd).max(0.0)
    }

    /// Spend still available before either ceiling is hit.
    pub fn remaining_usd(&self) -> f64 {
        self.daily_remaining_usd().min(self.monthly_remaining_usd())
    }

    fn apply(&mut self, cost_usd: f64) {
        let cost = cost_usd.max(0.0);
        self.daily_spent_usd += cost;
        self.monthly_spent_usd += cost;
        self.daily_request_count += 1;
        self.monthly_request_count += 1;
        self.refresh_flags();
    }
}

type QuotaKey = (String, Provider);

/// Enforces and accounts quota records.
pub struct QuotaManager {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    locks: Mutex<HashMap<QuotaKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>, config: QuotaConfig) -> Self {
        Self {
            store,
            clock,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Admit a call if neither ceiling is reached.
    ///
    /// Nothing is held back; spend is only applied by [`commit`](Self::commit).
    pub async fn check_and_reserve(&self, identity: &str, provider: Provider) -> Result<QuotaRecord> {
        let record = self.current(identity, provider).await?;
        admit(identity, provider, record)
    }

    /// Reject if either ceiling is reached, without writing anything.
    ///
    /// Cached answers go through here: they carry no spend and must not
    /// create or roll over a stored record.
    pub async fn check(&self, identity: &str, provider: Provider) -> Result<QuotaRecord> {
        let now = self.clock.now();
        let mut record = self.load_or_new(identity, provider, now).await?;
        record.roll_over(now);
        record.refresh_flags();
        admit(identity, provider, record)
    }

    /// Apply the cost of a successful, billable call.
    pub async fn commit(&self, identity: &str, provider: Provider, cost_usd: f64) -> Result<QuotaRecord> {
        let lock = self.key_lock(identity, provider);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut record = self.load_or_new(identity, provider, now).await?;
        record.roll_over(now);
        let was_exceeded = record.exceeded().is_some();
        record.apply(cost_usd);
        self.store.save_quota(&record).await?;

        if !was_exceeded && let Some(period) = record.exceeded() {
            warn!(
                identity,
                %provider,
                %period,
                daily_spent = record.daily_spent_usd,
                monthly_spent = record.monthly_spent_usd,
                "quota ceiling reached"
            );
        }
        Ok(record)
    }

    /// Current record after lazy rollover, created with defaults if absent.
    pub async fn status(&self, identity: &str, provider: Provider) -> Result<QuotaRecord> {
        self.current(identity, provider).await
    }

    /// Every stored record for `identity`, one per provider seen.
    pub async fn status_for(&self, identity: &str) -> Result<Vec<QuotaRecord>> {
        let mut out = Vec::new();
        for provider in Provider::ALL {
            if self.store.load_quota(identity, provider).await?.is_some() {
                out.push(self.current(identity, provider).await?);
            }
        }
        Ok(out)
    }

    /// Apply rollovers to every stored record and persist changed flags.
    pub async fn refresh_all(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut refreshed = 0;
        for stale in self.store.list_quotas().await? {
            let lock = self.key_lock(&stale.identity, stale.provider);
            let _guard = lock.lock().await;
            let Some(mut record) = self
                .store
                .load_quota(&stale.identity, stale.provider)
                .await?
            else {
                continue;
            };
            let before = (record.is_daily_exceeded, record.is_monthly_exceeded);
            let rolled = record.roll_over(now);
            record.refresh_flags();
            if rolled || before != (record.is_daily_exceeded, record.is_monthly_exceeded) {
                self.store.save_quota(&record).await?;
                refreshed += 1;
            }
        }
        self.prune_locks();
        Ok(refreshed)
    }

    async fn current(&self, identity: &str, provider: Provider) -> Result<QuotaRecord> {
        let lock = self.key_lock(identity, provider);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let (mut record, created) = match self.store.load_quota(identity, provider).await? {
            Some(record) => (record, false),
            None => (QuotaRecord::new(identity, provider, &self.config, now), true),
        };
        let flags = (record.is_daily_exceeded, record.is_monthly_exceeded);
        let rolled = record.roll_over(now);
        record.refresh_flags();
        if created || rolled || flags != (record.is_daily_exceeded, record.is_monthly_exceeded) {
            self.store.save_quota(&record).await?;
        }
        Ok(record)
    }

    async fn load_or_new(&self, identity: &str, provider: Provider, now: DateTime<Utc>) -> Result<QuotaRecord> {
        Ok(self
            .store
            .load_quota(identity, provider)
            .await?
            .unwrap_or_else(|| QuotaRecord::new(identity, provider, &self.config, now)))
    }

    /// Forget per-key locks nobody holds. Returns how many were dropped.
    fn prune_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    fn key_lock(&self, identity: &str, provider: Provider) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry((identity.to_string(), provider))
                .or_default(),
        )
    }
}

fn admit(identity: &str, provider: Provider, record: QuotaRecord) -> Result<QuotaRecord> {
    let Some(period) = record.exceeded() else {
        return Ok(record);
    };
    info!(identity, %provider, %period, "quota exceeded");
    metrics::counter!(telemetry::QUOTA_REJECTIONS_TOTAL,
        "provider" => provider.as_str(),
        "period" => match period {
            QuotaPeriod::Daily => "daily",
            QuotaPeriod::Monthly => "monthly",
        },
    )
    .increment(1);
    Err(HeimdallError::QuotaExceeded { period })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(now: DateTime<Utc>) -> QuotaRecord {
        QuotaRecord::new("user:1", Provider::Claude, &QuotaConfig::default(), now)
    }

    #[test]
    fn daily_rollover_keeps_monthly_spend() {
        let start = Utc.with_ymd_and_hms(2025, 5, 10, 23, 0, 0).unwrap();
        let mut r = record(start);
        r.apply(4.0);

        assert!(r.roll_over(start + chrono::Duration::hours(2)));
        assert_eq!(r.daily_spent_usd, 0.0);
        assert_eq!(r.daily_request_count, 0);
        assert_eq!(r.monthly_spent_usd, 4.0);
        assert_eq!(r.monthly_request_count, 1);
    }

    #[test]
    fn monthly_rollover_resets_both_at_month_boundary() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 22, 0, 0).unwrap();
        let mut r = record(start);
        r.apply(3.0);

        r.roll_over(Utc.with_ymd_and_hms(2025, 2, 1, 0, 30, 0).unwrap());
        assert_eq!(r.daily_spent_usd, 0.0);
        assert_eq!(r.monthly_spent_usd, 0.0);
    }

    #[test]
    fn same_day_does_not_roll() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut r = record(start);
        r.apply(1.0);
        assert!(!r.roll_over(start + chrono::Duration::hours(23)));
        assert_eq!(r.daily_spent_usd, 1.0);
    }

    #[test]
    fn flags_follow_spend_and_request_limits() {
        let now = Utc::now();
        let mut r = record(now);
        r.apply(9.99);
        assert_eq!(r.exceeded(), None);
        r.apply(0.01);
        assert_eq!(r.exceeded(), Some(QuotaPeriod::Daily));

        let mut r = QuotaRecord::new(
            "session:x",
            Provider::OpenAi,
            &QuotaConfig::new().monthly_request_limit(Some(2)),
            now,
        );
        r.apply(0.0);
        assert!(!r.is_monthly_exceeded);
        r.apply(0.0);
        assert_eq!(r.exceeded(), Some(QuotaPeriod::Monthly));
    }

    fn manager(config: QuotaConfig) -> (QuotaManager, Arc<crate::store::MemoryStore>) {
        let store = Arc::new(crate::store::MemoryStore::new());
        let clock = Arc::new(crate::clock::ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap(),
        ));
        (QuotaManager::new(store.clone(), clock, config), store)
    }

    #[tokio::test]
    async fn read_only_check_writes_nothing() {
        let (quotas, store) = manager(QuotaConfig::new().daily_limit_usd(1.0));
        quotas.check("session:a", Provider::Claude).await.unwrap();
        assert!(store.list_quotas().await.unwrap().is_empty());

        quotas.commit("user:1", Provider::Claude, 1.0).await.unwrap();
        let err = quotas.check("user:1", Provider::Claude).await.unwrap_err();
        assert!(matches!(err, HeimdallError::QuotaExceeded { period: QuotaPeriod::Daily }));
        let stored = store.load_quota("user:1", Provider::Claude).await.unwrap().unwrap();
        assert_eq!(stored.daily_request_count, 1);
    }

    #[tokio::test]
    async fn refresh_drops_idle_key_locks() {
        let (quotas, _store) = manager(QuotaConfig::default());
        for i in 0..5 {
            quotas
                .commit(&format!("session:{i}"), Provider::OpenAi, 0.01)
                .await
                .unwrap();
        }
        assert_eq!(quotas.locks.lock().unwrap().len(), 5);

        let held = quotas.key_lock("session:0", Provider::OpenAi);
        quotas.refresh_all().await.unwrap();
        assert_eq!(quotas.locks.lock().unwrap().len(), 1);

        drop(held);
        quotas.refresh_all().await.unwrap();
        assert!(quotas.locks.lock().unwrap().is_empty());
    }
}
