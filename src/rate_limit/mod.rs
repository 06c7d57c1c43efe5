//! Per-identity, per-provider sliding-window rate limiting.
//!
//! Two windows are checked per request, a minute and an hour, and a
//! request must pass both. The configured limits shrink with the
//! request's [`ThreatLevel`]: the effective limit is
//! `floor(limit * multiplier)`, never below one.
//!
//! If the [`WindowStore`] fails, the limiter lets the request through
//! (count 0) and logs the inconsistency.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::WindowStore;
use crate::telemetry;
use crate::types::{Provider, ThreatLevel};
use crate::{HeimdallError, Result};

/// Sliding window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Minute,
    Hour,
}

impl RateWindow {
    /// Narrowest first.
    pub const ALL: [RateWindow; 2] = [RateWindow::Minute, RateWindow::Hour];

    pub fn seconds(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }

    pub fn length(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }

    /// Start of the fixed window containing `at`.
    pub fn window_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = at.timestamp();
        let start = secs - secs.rem_euclid(self.seconds());
        DateTime::from_timestamp(start, 0).unwrap_or(at)
    }
}

impl std::fmt::Display for RateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Identity key (`user:..` or `session:..`).
    pub identity: String,
    pub provider: Provider,
    pub window: RateWindow,
}

impl WindowKey {
    pub fn new(identity: impl Into<String>, provider: Provider, window: RateWindow) -> Self {
        Self {
            identity: identity.into(),
            provider,
            window,
        }
    }

    /// Flat key for key-value backends.
    pub fn storage_key(&self) -> String {
        format!(
            "rate_limit:{}:{}:{}",
            self.identity, self.provider, self.window
        )
    }
}

/// Result of one atomic sliding-window step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideOutcome {
    pub allowed: bool,
    /// Entries in the window before this request was added.
    pub count: u32,
    /// Oldest surviving timestamp, if any.
    pub oldest: Option<DateTime<Utc>>,
}

/// Fixed-window usage row, one per (identity, provider, window start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub identity: String,
    pub provider: Provider,
    pub window: RateWindow,
    pub window_start: DateTime<Utc>,
    pub request_count: u64,
    pub token_count: u64,
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub window: RateWindow,
    /// Effective limit after threat scaling.
    pub limit: u32,
    pub count: u32,
    pub remaining: u32,
    /// When the window frees up a slot.
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Time from `now` until `reset_at`, at least one second.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        let secs = (self.reset_at - now).num_seconds().max(1);
        Duration::from_secs(secs as u64)
    }
}

/// Configuration for the rate limiter.
///
/// ```rust
/// # use heimdall::RateLimitConfig;
/// let config = RateLimitConfig::new().per_minute(30).per_hour(500);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per 60 s sliding window. Default: 60.
    pub per_minute: u32,
    /// Requests per 3600 s sliding window. Default: 1000.
    pub per_hour: u32,
    /// Shrink limits for elevated threat levels. Default: true.
    pub scale_by_threat: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            scale_by_threat: true,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_minute(mut self, n: u32) -> Self {
        self.per_minute = n;
        self
    }

    pub fn per_hour(mut self, n: u32) -> Self {
        self.per_hour = n;
        self
    }

    pub fn scale_by_threat(mut self, enabled: bool) -> Self {
        self.scale_by_threat = enabled;
        self
    }

    /// Configured limit for `window`, before threat scaling.
    pub fn limit_for(&self, window: RateWindow) -> u32 {
        match window {
            RateWindow::Minute => self.per_minute,
            RateWindow::Hour => self.per_hour,
        }
    }
}

/// Sliding-window rate limiter over a [`WindowStore`].
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Limit for `window` after scaling by `threat`.
    pub fn effective_limit(&self, window: RateWindow, threat: ThreatLevel) -> u32 {
        let base = self.config.limit_for(window);
        if !self.config.scale_by_threat {
            return base;
        }
        scale_limit(base, threat)
    }

    /// Check one window and, if allowed, count this request in it.
    pub async fn check(
        &self,
        identity: &str,
        provider: Provider,
        window: RateWindow,
        limit: u32,
    ) -> RateDecision {
        let now = self.clock.now();
        let key = WindowKey::new(identity, provider, window);

        match self.store.slide(&key, now, limit).await {
            Ok(outcome) if outcome.allowed => RateDecision {
                allowed: true,
                window,
                limit,
                count: outcome.count + 1,
                remaining: limit.saturating_sub(outcome.count + 1),
                reset_at: now + window.length(),
            },
            Ok(outcome) => RateDecision {
                allowed: false,
                window,
                limit,
                count: outcome.count,
                remaining: 0,
                reset_at: outcome.oldest.unwrap_or(now) + window.length(),
            },
            Err(e) => {
                warn!(
                    identity,
                    %provider,
                    %window,
                    error = %e,
                    "rate limit store unavailable, allowing request"
                );
                metrics::counter!(telemetry::RATE_LIMIT_FAIL_OPEN_TOTAL,
                    "provider" => provider.as_str(),
                )
                .increment(1);
                RateDecision {
                    allowed: true,
                    window,
                    limit,
                    count: 0,
                    remaining: limit,
                    reset_at: now + window.length(),
                }
            }
        }
    }

    /// Check both windows for one request, narrowest first.
    ///
    /// Returns the allowed decision with the fewest remaining slots, or
    /// [`HeimdallError::RateLimited`] for the first window that rejects.
    pub async fn check_request(
        &self,
        identity: &str,
        provider: Provider,
        threat: ThreatLevel,
    ) -> Result<RateDecision> {
        let mut tightest: Option<RateDecision> = None;
        for window in RateWindow::ALL {
            let limit = self.effective_limit(window, threat);
            let decision = self.check(identity, provider, window, limit).await;
            if !decision.allowed {
                metrics::counter!(telemetry::RATE_LIMITED_TOTAL,
                    "provider" => provider.as_str(),
                    "window" => window.as_str(),
                )
                .increment(1);
                debug!(identity, %provider, %window, limit, %threat, "rate limited");
                return Err(HeimdallError::RateLimited {
                    window,
                    limit,
                    retry_after: decision.retry_after(self.clock.now()),
                });
            }
            if tightest.is_none_or(|t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
        }
        tightest.ok_or_else(|| HeimdallError::Internal("no rate windows configured".into()))
    }

    /// Add a completed request and its tokens to the current fixed windows.
    ///
    /// Best effort: failures are logged, not returned.
    pub async fn record_usage(&self, identity: &str, provider: Provider, tokens: u64) {
        let now = self.clock.now();
        for window in RateWindow::ALL {
            let key = WindowKey::new(identity, provider, window);
            if let Err(e) = self
                .store
                .record_window(&key, window.window_start(now), tokens)
                .await
            {
                warn!(identity, %provider, %window, error = %e, "failed to record window usage");
            }
        }
    }

    /// Fixed-window usage row for the window containing now.
    pub async fn current_usage(
        &self,
        identity: &str,
        provider: Provider,
        window: RateWindow,
    ) -> Result<Option<RateLimitWindow>> {
        let key = WindowKey::new(identity, provider, window);
        let start = window.window_start(self.clock.now());
        self.store.get_window(&key, start).await
    }

    /// Drop expired window state.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_windows(self.clock.now()).await
    }
}

/// `floor(base * multiplier)`, never below one.
pub fn scale_limit(base: u32, threat: ThreatLevel) -> u32 {
    let scaled = (f64::from(base) * threat.rate_multiplier()).floor() as u32;
    scaled.max(1)
}
