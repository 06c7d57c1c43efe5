//! Administrative and reporting operations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Gateway;
use crate::Result;
use crate::circuit::{BreakerState, CircuitBreakerRecord};
use crate::quota::QuotaRecord;
use crate::types::{CallerIdentity, Provider, RequestStatus, UsageLogEntry, UsageQuery};

/// Aggregate usage over a query window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalytics {
    pub total_requests: u64,
    pub successful: u64,
    pub cached: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub avg_response_time_ms: f64,
    pub by_provider: BTreeMap<Provider, ProviderUsage>,
    /// One row per UTC day that saw traffic, oldest first.
    pub daily: Vec<DailyUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub cost_usd: f64,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub requests: u64,
    pub cost_usd: f64,
    pub tokens: u64,
}

/// Health summary for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    /// Whether a request arriving now would reach the provider.
    pub available: bool,
    pub circuit_state: BreakerState,
    pub failure_count: u32,
    pub requests_last_hour: u64,
    /// Fraction of last-hour requests that succeeded or hit the cache. 1.0 with no traffic.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

/// Spend and remaining budget for one (identity, provider) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub provider: Provider,
    pub daily_spent_usd: f64,
    pub daily_limit_usd: f64,
    pub daily_remaining_usd: f64,
    pub monthly_spent_usd: f64,
    pub monthly_limit_usd: f64,
    pub monthly_remaining_usd: f64,
    pub daily_request_count: u64,
    pub monthly_request_count: u64,
    pub is_daily_exceeded: bool,
    pub is_monthly_exceeded: bool,
}

impl From<&QuotaRecord> for QuotaStatus {
    fn from(record: &QuotaRecord) -> Self {
        Self {
            provider: record.provider,
            daily_spent_usd: record.daily_spent_usd,
            daily_limit_usd: record.daily_limit_usd,
            daily_remaining_usd: record.daily_remaining_usd(),
            monthly_spent_usd: record.monthly_spent_usd,
            monthly_limit_usd: record.monthly_limit_usd,
            monthly_remaining_usd: record.monthly_remaining_usd(),
            daily_request_count: record.daily_request_count,
            monthly_request_count: record.monthly_request_count,
            is_daily_exceeded: record.is_daily_exceeded,
            is_monthly_exceeded: record.is_monthly_exceeded,
        }
    }
}

/// What one maintenance pass reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub cache_purged: usize,
    pub windows_purged: usize,
    pub quotas_refreshed: usize,
}

impl Gateway {
    /// Force a provider's breaker (or one model's breaker) back to closed.
    pub async fn reset_breaker(
        &self,
        provider: Provider,
        model: Option<&str>,
    ) -> Result<Vec<CircuitBreakerRecord>> {
        let records = self.breakers.reset(provider, model).await?;
        info!(%provider, model, reset = records.len(), "circuit breaker reset");
        Ok(records)
    }

    /// Drop cached responses for one provider, or all of them.
    pub async fn clear_cache(&self, provider: Option<Provider>) -> Result<usize> {
        let removed = self.cache.clear(provider).await?;
        info!(provider = ?provider, removed, "cache cleared");
        Ok(removed)
    }

    /// Aggregate the usage log over `query`.
    pub async fn usage_analytics(&self, query: &UsageQuery) -> Result<UsageAnalytics> {
        let entries = self.usage.query(query).await?;
        Ok(aggregate(&entries))
    }

    /// Health of every registered provider over the last hour.
    pub async fn provider_status(&self) -> Result<Vec<ProviderStatus>> {
        let now = self.clock.now();
        let mut statuses = Vec::new();
        for provider in self.providers.providers() {
            let breaker = self.breakers.provider_state(provider).await?;
            let recent = self
                .usage
                .query(
                    &UsageQuery::new()
                        .provider(provider)
                        .since(now - chrono::Duration::hours(1)),
                )
                .await?;

            let requests = recent.len() as u64;
            let ok = recent
                .iter()
                .filter(|e| matches!(e.status, RequestStatus::Success | RequestStatus::Cached))
                .count() as u64;
            let success_rate = if requests == 0 {
                1.0
            } else {
                ok as f64 / requests as f64
            };

            statuses.push(ProviderStatus {
                provider,
                available: breaker.is_available(now),
                circuit_state: breaker.state,
                failure_count: breaker.failure_count,
                requests_last_hour: requests,
                success_rate,
                avg_response_time_ms: mean_response_time(&recent),
            });
        }
        Ok(statuses)
    }

    /// Quota state for every provider the caller has used.
    pub async fn quota_status(&self, caller: &CallerIdentity) -> Result<Vec<QuotaStatus>> {
        let records = self.quotas.status_for(&caller.key()).await?;
        Ok(records.iter().map(QuotaStatus::from).collect())
    }

    /// One maintenance pass: purge expired cache and window state, refresh quota flags.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let report = SweepReport {
            cache_purged: self.cache.purge_expired().await?,
            windows_purged: self.limiter.purge_expired().await?,
            quotas_refreshed: self.quotas.refresh_all().await?,
        };
        debug!(?report, "maintenance sweep complete");
        Ok(report)
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("maintenance task stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "maintenance sweep failed");
                        }
                    }
                }
            }
        })
    }
}

fn aggregate(entries: &[UsageLogEntry]) -> UsageAnalytics {
    let mut analytics = UsageAnalytics::default();
    let mut daily: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();

    for entry in entries {
        analytics.total_requests += 1;
        match entry.status {
            RequestStatus::Success => analytics.successful += 1,
            RequestStatus::Cached => analytics.cached += 1,
            RequestStatus::Failed => analytics.failed += 1,
            RequestStatus::RateLimited => analytics.rate_limited += 1,
        }
        let tokens = u64::from(entry.total_tokens());
        analytics.total_cost_usd += entry.cost_usd;
        analytics.total_tokens += tokens;

        let by_provider = analytics.by_provider.entry(entry.provider).or_default();
        by_provider.requests += 1;
        by_provider.cost_usd += entry.cost_usd;
        by_provider.tokens += tokens;

        let date = entry.created_at.date_naive();
        let day = daily.entry(date).or_insert(DailyUsage {
            date,
            requests: 0,
            cost_usd: 0.0,
            tokens: 0,
        });
        day.requests += 1;
        day.cost_usd += entry.cost_usd;
        day.tokens += tokens;
    }

    analytics.avg_response_time_ms = mean_response_time(entries);
    analytics.daily = daily.into_values().collect();
    analytics
}

fn mean_response_time(entries: &[UsageLogEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let total: u64 = entries.iter().map(|e| e.response_time_ms).sum();
    total as f64 / entries.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(provider: Provider, status: RequestStatus, cost: f64, day: u32) -> UsageLogEntry {
        UsageLogEntry {
            identity: "user:u1".into(),
            provider,
            model: None,
            fingerprint: None,
            status,
            prompt_tokens: 10,
            completion_tokens: 5,
            cost_usd: cost,
            response_time_ms: 100,
            error_code: None,
            error_message: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn aggregate_groups_by_status_provider_and_day() {
        let entries = vec![
            entry(Provider::Claude, RequestStatus::Success, 0.5, 1),
            entry(Provider::Claude, RequestStatus::Cached, 0.0, 1),
            entry(Provider::OpenAi, RequestStatus::Failed, 0.0, 2),
            entry(Provider::OpenAi, RequestStatus::RateLimited, 0.0, 2),
        ];
        let a = aggregate(&entries);
        assert_eq!(a.total_requests, 4);
        assert_eq!((a.successful, a.cached, a.failed, a.rate_limited), (1, 1, 1, 1));
        assert!((a.total_cost_usd - 0.5).abs() < 1e-9);
        assert_eq!(a.total_tokens, 60);
        assert_eq!(a.by_provider[&Provider::Claude].requests, 2);
        assert_eq!(a.daily.len(), 2);
        assert_eq!(a.daily[0].date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert!((a.avg_response_time_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_of_nothing_is_zeroed() {
        let a = aggregate(&[]);
        assert_eq!(a, UsageAnalytics::default());
    }
}
