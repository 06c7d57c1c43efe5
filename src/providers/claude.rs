//! Anthropic Messages API adapter.
//!
//! See: <https://docs.anthropic.com/en/api/messages>

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{CLIENT_TIMEOUT, build_client, handle_response_errors, transport_error};
use super::traits::ProviderAdapter;
use crate::types::{ChatCompletion, NormalizedRequest, Provider, Role, Usage};
use crate::{HeimdallError, Result};

/// Default base URL for the Anthropic API
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";

/// Model used when a request names none.
pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

/// Client for the Anthropic Messages API.
#[derive(Clone)]
pub struct ClaudeAdapter {
    api_key: String,
    http: Client,
    base_url: String,
    default_model: String,
}

impl ClaudeAdapter {
    /// Create a new adapter with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create an adapter with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http: build_client(CLIENT_TIMEOUT),
            base_url: base_url.into(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl std::fmt::Debug for ClaudeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAdapter")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn temperature_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    async fn send(&self, request: &NormalizedRequest) -> Result<ChatCompletion> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest::from_normalized(request);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, CLIENT_TIMEOUT))?;

        let response = handle_response_errors(response, Provider::Claude).await?;
        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, CLIENT_TIMEOUT))?;

        let content: String = reply
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if content.is_empty() {
            return Err(HeimdallError::EmptyResponse);
        }
        debug!(model = %reply.model, input = reply.usage.input_tokens, output = reply.usage.output_tokens, "claude reply");

        Ok(ChatCompletion {
            id: Some(reply.id),
            model: reply.model,
            content,
            finish_reason: reply.stop_reason,
            usage: Usage::new(reply.usage.input_tokens, reply.usage.output_tokens),
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

impl<'a> MessagesRequest<'a> {
    /// System messages move to the top-level `system` field.
    fn from_normalized(request: &'a NormalizedRequest) -> Self {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            top_p: request.top_p,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn system_messages_are_lifted() {
        let request = NormalizedRequest {
            provider: Provider::Claude,
            model: DEFAULT_MODEL.into(),
            messages: vec![Message::system("be terse"), Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
            top_p: None,
            frequency_penalty: Some(1.0),
            presence_penalty: None,
        };
        let body = serde_json::to_value(MessagesRequest::from_normalized(&request)).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("frequency_penalty").is_none());
    }
}
