//! Provider replies and the outbound response envelope

use serde::{Deserialize, Serialize};

use crate::HeimdallError;

/// Token usage for a single upstream call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// A successful completion from an upstream provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    pub model: String,
    pub content: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// Error part of the outbound envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Outbound response envelope handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ChatCompletion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub cached: bool,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<f64>,
    /// HTTP status the outer layer should answer with.
    #[serde(skip)]
    pub status: u16,
}

impl GatewayResponse {
    /// Envelope for a failed request.
    pub fn from_error(err: &HeimdallError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.public_message(),
                retry_after_secs: err.retry_after().map(|d| d.as_secs().max(1)),
            }),
            cached: false,
            cost: 0.0,
            response_time_ms: None,
            rate_limit_remaining: None,
            quota_remaining: None,
            status: err.status_code(),
        }
    }

    /// Value for a `Retry-After` header, if the error carries one.
    pub fn retry_after_header(&self) -> Option<String> {
        self.error
            .as_ref()
            .and_then(|e| e.retry_after_secs)
            .map(|s| s.to_string())
    }
}

impl From<HeimdallError> for GatewayResponse {
    fn from(err: HeimdallError) -> Self {
        Self::from_error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::rate_limit::RateWindow;

    #[test]
    fn rate_limited_error_carries_retry_after() {
        let resp = GatewayResponse::from(HeimdallError::RateLimited {
            window: RateWindow::Minute,
            limit: 60,
            retry_after: Duration::from_secs(12),
        });
        assert!(!resp.success);
        assert_eq!(resp.status, 429);
        assert_eq!(resp.retry_after_header().as_deref(), Some("12"));
        assert_eq!(resp.error.unwrap().code, "rate_limited");
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let resp = GatewayResponse::from(HeimdallError::Validation("empty".into()));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["cached"], false);
        assert!(json.get("status").is_none());
        assert!(json.get("responseTimeMs").is_none());
    }
}
