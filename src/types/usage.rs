//! Append-only usage log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Provider;

/// Outcome recorded for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Failed,
    Cached,
    RateLimited,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cached => "cached",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in the usage log. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    /// Identity key (`user:..` or `session:..`).
    pub identity: String,
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    /// Absent when the request was rejected before it could be normalized.
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub status: RequestStatus,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub response_time_ms: u64,
    /// Machine-readable error code for rejections and failures.
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageLogEntry {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Filter for usage log reads and analytics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageQuery {
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub provider: Option<Provider>,
    /// Identity key (`user:..` or `session:..`).
    pub identity: Option<String>,
}

impl UsageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn identity(mut self, key: impl Into<String>) -> Self {
        self.identity = Some(key.into());
        self
    }

    /// Whether `entry` falls inside this query.
    pub fn matches(&self, entry: &UsageLogEntry) -> bool {
        self.since.is_none_or(|s| entry.created_at >= s)
            && self.until.is_none_or(|u| entry.created_at < u)
            && self.provider.is_none_or(|p| entry.provider == p)
            && self
                .identity
                .as_deref()
                .is_none_or(|id| entry.identity == id)
    }
}
