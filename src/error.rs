//! Heimdall error types

use std::time::Duration;

use crate::rate_limit::RateWindow;
use crate::types::Provider;

/// Which quota ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPeriod {
    Daily,
    Monthly,
}

impl std::fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Heimdall error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    // Admission errors (terminal, returned to the caller as-is)
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("client blocked: {reason}")]
    BlockedClient { reason: String },

    #[error("request rejected as a critical threat")]
    CriticalThreat { issues: Vec<String> },

    #[error("rate limited on {window} window (limit {limit}), retry after {retry_after:?}")]
    RateLimited {
        window: RateWindow,
        limit: u32,
        retry_after: Duration,
    },

    #[error("{period} quota exceeded")]
    QuotaExceeded { period: QuotaPeriod },

    #[error("circuit open for {provider}")]
    CircuitOpen {
        provider: Provider,
        retry_after: Option<Duration>,
    },

    // Upstream errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream authentication failed")]
    AuthenticationFailed,

    #[error("empty response from provider")]
    EmptyResponse,

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    // Gateway errors
    #[error("no provider configured")]
    NoProvider,

    #[error("provider {0} is not configured")]
    ProviderNotConfigured(Provider),

    #[error("store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HeimdallError {
    /// Whether a retry of the same upstream call might succeed.
    ///
    /// Connection failures, timeouts and 429/5xx upstream statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) | Self::EmptyResponse => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Hint for when the caller may try again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_structure",
            Self::BlockedClient { .. } => "blocked_client",
            Self::CriticalThreat { .. } => "critical_threat",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::CircuitOpen { .. } => "service_unavailable",
            Self::Http(_)
            | Self::Upstream { .. }
            | Self::AuthenticationFailed
            | Self::EmptyResponse => "provider_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::ProviderNotConfigured(_) => "unsupported_provider",
            Self::NoProvider
            | Self::Store(_)
            | Self::Json(_)
            | Self::Configuration(_)
            | Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP-style status the outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::ProviderNotConfigured(_) => 400,
            Self::QuotaExceeded { .. } => 402,
            Self::BlockedClient { .. } => 403,
            Self::CriticalThreat { .. } => 422,
            Self::RateLimited { .. } => 429,
            Self::Cancelled => 499,
            Self::Http(_)
            | Self::Upstream { .. }
            | Self::AuthenticationFailed
            | Self::EmptyResponse => 502,
            Self::CircuitOpen { .. } => 503,
            Self::Timeout(_) => 504,
            Self::NoProvider
            | Self::Store(_)
            | Self::Json(_)
            | Self::Configuration(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Human-readable message that is safe to hand to an end user.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => format!("invalid request: {msg}"),
            Self::BlockedClient { .. } => {
                "request blocked due to security policy violation".to_string()
            }
            Self::CriticalThreat { .. } => {
                "request blocked due to security policy violation".to_string()
            }
            Self::RateLimited { window, .. } => {
                format!("too many requests in the current {window} window, please slow down")
            }
            Self::QuotaExceeded { period } => format!("{period} usage quota exceeded"),
            Self::CircuitOpen { provider, .. } => {
                format!("{provider} service is temporarily unavailable")
            }
            Self::Upstream { status, .. } => {
                format!("the AI provider returned an error (status {status})")
            }
            Self::Http(_) | Self::AuthenticationFailed | Self::EmptyResponse => {
                "the AI provider request failed".to_string()
            }
            Self::Timeout(_) => "the AI provider did not respond in time".to_string(),
            Self::Cancelled => "the request was cancelled".to_string(),
            Self::ProviderNotConfigured(provider) => {
                format!("provider {provider} is not available")
            }
            Self::NoProvider
            | Self::Store(_)
            | Self::Json(_)
            | Self::Configuration(_)
            | Self::Internal(_) => {
                "an internal error occurred while processing your request".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for HeimdallError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            HeimdallError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            HeimdallError::Http(err.to_string())
        }
    }
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
