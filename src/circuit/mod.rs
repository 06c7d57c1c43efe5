//! Per-provider circuit breakers.
//!
//! ```text
//!   closed ──(failures ≥ threshold)──► open
//!     ▲                                  │ first check after next_attempt_at
//!     │ success                          ▼
//!     └────────────────────────────── half_open ──(failure)──► open
//! ```
//!
//! The open → half_open transition is evaluated lazily in
//! [`CircuitBreakerRegistry::check`]. Half-open admits exactly one probe;
//! concurrent callers are rejected until the probe reports back. A probe
//! whose [`BreakerPermit`] is dropped without an outcome (for example on
//! cancellation) frees the slot for the next caller.
//!
//! Each breaker's state lives behind its own short-lived lock, never held
//! across an await. The record is persisted to the [`BreakerStore`] after
//! every mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::store::BreakerStore;
use crate::telemetry;
use crate::types::Provider;
use crate::{HeimdallError, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one breaker: a provider, optionally narrowed to a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakerKey {
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
}

impl BreakerKey {
    pub fn provider(provider: Provider) -> Self {
        Self {
            provider,
            model: None,
        }
    }

    pub fn model(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: Some(model.into()),
        }
    }
}

impl std::fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}/{}", self.provider, model),
            None => write!(f, "{}", self.provider),
        }
    }
}

/// Persisted breaker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub key: BreakerKey,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl CircuitBreakerRecord {
    pub fn new(key: BreakerKey, config: &BreakerConfig) -> Self {
        Self {
            key,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            next_attempt_at: None,
            failure_threshold: config.failure_threshold,
            recovery_timeout_secs: config.recovery_timeout.as_secs(),
        }
    }

    fn recovery_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.recovery_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Whether a call arriving at `now` would be let through, without
    /// changing any state.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => self.next_attempt_at.is_some_and(|at| now >= at),
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = BreakerState::Open;
        self.next_attempt_at = Some(now + self.recovery_timeout());
    }
}

/// Configuration for circuit breakers.
///
/// ```rust
/// # use heimdall::BreakerConfig;
/// # use std::time::Duration;
/// let config = BreakerConfig::new()
///     .failure_threshold(3)
///     .recovery_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures before the breaker opens. Default: 5.
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed. Default: 60s.
    #[serde(with = "crate::config::duration_secs")]
    pub recovery_timeout: Duration,
    /// Keep one breaker per provider+model instead of per provider. Default: false.
    pub per_model: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            per_model: false,
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn per_model(mut self, enabled: bool) -> Self {
        self.per_model = enabled;
        self
    }
}

#[derive(Debug)]
struct BreakerCell {
    record: CircuitBreakerRecord,
    probe_in_flight: bool,
}

type SharedCell = Arc<Mutex<BreakerCell>>;

fn lock(cell: &SharedCell) -> MutexGuard<'_, BreakerCell> {
    cell.lock().unwrap_or_else(|e| e.into_inner())
}

/// Admission ticket returned by [`CircuitBreakerRegistry::check`].
///
/// Hand it back through [`record_success`](CircuitBreakerRegistry::record_success)
/// or [`record_failure`](CircuitBreakerRegistry::record_failure). Dropping a
/// half-open probe permit without an outcome releases the probe slot.
#[derive(Debug)]
pub struct BreakerPermit {
    cell: SharedCell,
    key: BreakerKey,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    /// Whether this call is the half-open recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            lock(&self.cell).probe_in_flight = false;
        }
    }
}

/// All breakers, keyed by [`BreakerKey`].
pub struct CircuitBreakerRegistry {
    store: Arc<dyn BreakerStore>,
    clock: Arc<dyn Clock>,
    config: BreakerConfig,
    cells: Mutex<HashMap<BreakerKey, SharedCell>>,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<dyn BreakerStore>, clock: Arc<dyn Clock>, config: BreakerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Breaker key for a call to `model` on `provider`.
    pub fn key_for(&self, provider: Provider, model: &str) -> BreakerKey {
        if self.config.per_model {
            BreakerKey::model(provider, model)
        } else {
            BreakerKey::provider(provider)
        }
    }

    /// Consult the breaker before contacting the provider.
    ///
    /// Returns [`HeimdallError::CircuitOpen`] without touching any
    /// counters when the breaker is open, or half-open with its probe
    /// already taken.
    pub async fn check(&self, provider: Provider, model: &str) -> Result<BreakerPermit> {
        let key = self.key_for(provider, model);
        let cell = self.cell(&key).await;
        let now = self.clock.now();

        let (permit, transitioned) = {
            let mut guard = lock(&cell);
            match guard.record.state {
                BreakerState::Closed => (Ok(false), None),
                BreakerState::Open => match guard.record.next_attempt_at {
                    Some(at) if now >= at => {
                        guard.record.state = BreakerState::HalfOpen;
                        guard.probe_in_flight = true;
                        (Ok(true), Some(guard.record.clone()))
                    }
                    at => {
                        let retry_after = at.and_then(|at| (at - now).to_std().ok());
                        (Err(retry_after), None)
                    }
                },
                BreakerState::HalfOpen if guard.probe_in_flight => (Err(None), None),
                BreakerState::HalfOpen => {
                    guard.probe_in_flight = true;
                    (Ok(true), None)
                }
            }
        };

        if let Some(record) = transitioned {
            info!(breaker = %key, "circuit half-open, allowing probe");
            metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
                "provider" => provider.as_str(),
                "to" => BreakerState::HalfOpen.as_str(),
            )
            .increment(1);
            self.persist(&record).await;
        }

        match permit {
            Ok(probe) => Ok(BreakerPermit {
                cell,
                key,
                probe,
                settled: false,
            }),
            Err(retry_after) => {
                metrics::counter!(telemetry::CIRCUIT_REJECTIONS_TOTAL,
                    "provider" => provider.as_str(),
                )
                .increment(1);
                Err(HeimdallError::CircuitOpen {
                    provider,
                    retry_after,
                })
            }
        }
    }

    /// Report a successful upstream call.
    pub async fn record_success(&self, mut permit: BreakerPermit) {
        let now = self.clock.now();
        let (record, closed) = {
            let mut guard = lock(&permit.cell);
            let record = &mut guard.record;
            record.success_count += 1;
            record.last_success_at = Some(now);
            let closed = record.state == BreakerState::HalfOpen;
            if closed {
                record.state = BreakerState::Closed;
                record.failure_count = 0;
                record.next_attempt_at = None;
            }
            let record = record.clone();
            if permit.probe {
                guard.probe_in_flight = false;
            }
            permit.settled = true;
            (record, closed)
        };

        if closed {
            info!(breaker = %permit.key, "circuit closed after successful probe");
            metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
                "provider" => permit.key.provider.as_str(),
                "to" => BreakerState::Closed.as_str(),
            )
            .increment(1);
        }
        self.persist(&record).await;
    }

    /// Report a failed upstream call (including timeouts).
    pub async fn record_failure(&self, mut permit: BreakerPermit) {
        let now = self.clock.now();
        let (record, opened) = {
            let mut guard = lock(&permit.cell);
            let record = &mut guard.record;
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_at = Some(now);
            let opened =
                record.state != BreakerState::Open && record.failure_count >= record.failure_threshold;
            if opened {
                record.trip(now);
            }
            let record = record.clone();
            if permit.probe {
                guard.probe_in_flight = false;
            }
            permit.settled = true;
            (record, opened)
        };

        if opened {
            warn!(
                breaker = %permit.key,
                failures = record.failure_count,
                recovery_secs = record.recovery_timeout_secs,
                "circuit opened"
            );
            metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
                "provider" => permit.key.provider.as_str(),
                "to" => BreakerState::Open.as_str(),
            )
            .increment(1);
        }
        self.persist(&record).await;
    }

    /// Force a breaker back to closed with a zero failure count.
    ///
    /// With `model` set, resets only that model's breaker; otherwise every
    /// breaker for `provider` is reset.
    pub async fn reset(&self, provider: Provider, model: Option<&str>) -> Result<Vec<CircuitBreakerRecord>> {
        let mut keys: Vec<BreakerKey> = match model {
            Some(model) => vec![self.key_for(provider, model)],
            None => self
                .known_keys()
                .await?
                .into_iter()
                .filter(|k| k.provider == provider)
                .collect(),
        };
        if keys.is_empty() {
            keys.push(BreakerKey::provider(provider));
        }

        let mut reset = Vec::with_capacity(keys.len());
        for key in keys {
            let cell = self.cell(&key).await;
            let record = {
                let mut guard = lock(&cell);
                guard.record.state = BreakerState::Closed;
                guard.record.failure_count = 0;
                guard.record.next_attempt_at = None;
                guard.probe_in_flight = false;
                guard.record.clone()
            };
            self.store.save_breaker(&record).await?;
            info!(breaker = %key, "circuit manually reset");
            reset.push(record);
        }
        Ok(reset)
    }

    /// Current record for a breaker, loading it if needed.
    pub async fn snapshot(&self, key: &BreakerKey) -> CircuitBreakerRecord {
        let cell = self.cell(key).await;
        lock(&cell).record.clone()
    }

    /// Every breaker known in memory or in the store.
    pub async fn records(&self) -> Result<Vec<CircuitBreakerRecord>> {
        let mut out = Vec::new();
        for key in self.known_keys().await? {
            out.push(self.snapshot(&key).await);
        }
        Ok(out)
    }

    /// Most severe state across every breaker for `provider`.
    pub async fn provider_state(&self, provider: Provider) -> Result<CircuitBreakerRecord> {
        let records = self.records().await?;
        let worst = records
            .into_iter()
            .filter(|r| r.key.provider == provider)
            .max_by_key(|r| match r.state {
                BreakerState::Closed => 0,
                BreakerState::HalfOpen => 1,
                BreakerState::Open => 2,
            });
        Ok(worst.unwrap_or_else(|| {
            CircuitBreakerRecord::new(BreakerKey::provider(provider), &self.config)
        }))
    }

    async fn known_keys(&self) -> Result<Vec<BreakerKey>> {
        let mut keys: Vec<BreakerKey> = self
            .store
            .list_breakers()
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect();
        {
            let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            keys.extend(cells.keys().cloned());
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn cell(&self, key: &BreakerKey) -> SharedCell {
        let existing = self
            .cells
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        if let Some(cell) = existing {
            return cell;
        }

        let record = match self.store.load_breaker(key).await {
            Ok(Some(record)) => record,
            Ok(None) => CircuitBreakerRecord::new(key.clone(), &self.config),
            Err(e) => {
                warn!(breaker = %key, error = %e, "failed to load breaker, starting closed");
                CircuitBreakerRecord::new(key.clone(), &self.config)
            }
        };

        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(cells.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(BreakerCell {
                record,
                probe_in_flight: false,
            }))
        }))
    }

    async fn persist(&self, record: &CircuitBreakerRecord) {
        if let Err(e) = self.store.save_breaker(record).await {
            warn!(breaker = %record.key, error = %e, "failed to persist breaker state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn registry(threshold: u32) -> (CircuitBreakerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let registry = CircuitBreakerRegistry::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            BreakerConfig::new()
                .failure_threshold(threshold)
                .recovery_timeout(Duration::from_secs(60)),
        );
        (registry, clock)
    }

    #[tokio::test]
    async fn dropped_probe_releases_slot() {
        let (registry, clock) = registry(1);
        let permit = registry.check(Provider::Claude, "m").await.unwrap();
        registry.record_failure(permit).await;

        clock.advance(chrono::Duration::seconds(61));
        let probe = registry.check(Provider::Claude, "m").await.unwrap();
        assert!(probe.is_probe());
        assert!(registry.check(Provider::Claude, "m").await.is_err());

        drop(probe);
        let probe = registry.check(Provider::Claude, "m").await.unwrap();
        assert!(probe.is_probe());
    }

    #[tokio::test]
    async fn per_model_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = CircuitBreakerRegistry::new(
            Arc::new(MemoryStore::new()),
            clock,
            BreakerConfig::new().failure_threshold(1).per_model(true),
        );
        let permit = registry.check(Provider::OpenAi, "a").await.unwrap();
        registry.record_failure(permit).await;

        assert!(registry.check(Provider::OpenAi, "a").await.is_err());
        assert!(registry.check(Provider::OpenAi, "b").await.is_ok());
    }
}
