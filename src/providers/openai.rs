//! OpenAI Chat Completions API adapter.
//!
//! See: <https://platform.openai.com/docs/api-reference/chat>

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{CLIENT_TIMEOUT, build_client, handle_response_errors, transport_error};
use super::traits::ProviderAdapter;
use crate::types::{ChatCompletion, NormalizedRequest, Provider, Usage};
use crate::{HeimdallError, Result};

/// Default base URL for the OpenAI API
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Model used when a request names none.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Client for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    http: Client,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
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

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn temperature_range(&self) -> (f64, f64) {
        (0.0, 2.0)
    }

    async fn send(&self, request: &NormalizedRequest) -> Result<ChatCompletion> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, CLIENT_TIMEOUT))?;

        let response = handle_response_errors(response, Provider::OpenAi).await?;
        let reply: CompletionResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, CLIENT_TIMEOUT))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or(HeimdallError::EmptyResponse)?;
        let content = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or(HeimdallError::EmptyResponse)?;
        let usage = reply.usage.unwrap_or_default();
        debug!(model = %reply.model, prompt = usage.prompt_tokens, completion = usage.completion_tokens, "openai reply");

        Ok(ChatCompletion {
            id: reply.id,
            model: reply.model,
            content,
            finish_reason: choice.finish_reason,
            usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: Option<String>,
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
