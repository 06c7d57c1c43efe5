//! Inbound request envelope and its normalized form.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{Message, Provider, Role};

/// Who is making the call.
///
/// Authenticated users and anonymous sessions get separate limiter,
/// quota and log keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerIdentity {
    User(String),
    Session(String),
}

impl CallerIdentity {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }

    /// Stable composite key, e.g. `user:42` or `session:abc`.
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Session(id) => format!("session:{id}"),
        }
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Transport-level facts about the client, supplied by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Raw `X-Forwarded-For` / `X-Real-IP` values, in header order.
    #[serde(default)]
    pub forwarded_for: Vec<String>,
}

impl ClientMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for.push(value.into());
        self
    }
}

/// A message as received, before structural validation.
///
/// `content` stays an untyped JSON value so that non-string content is
/// reported as a validation issue instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    pub content: serde_json::Value,
}

impl From<Message> for InboundMessage {
    fn from(m: Message) -> Self {
        Self {
            role: m.role.as_str().to_string(),
            content: serde_json::Value::String(m.content),
        }
    }
}

/// Inbound chat request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<InboundMessage>>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub stream: Option<bool>,
    pub caller: CallerIdentity,
}

impl ChatRequest {
    /// Start an empty request for `provider` on behalf of `caller`.
    pub fn new(provider: Provider, caller: CallerIdentity) -> Self {
        Self {
            provider,
            model: None,
            messages: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: None,
            caller,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Append a message.
    pub fn message(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages
            .get_or_insert_with(Vec::new)
            .push(Message {
                role,
                content: content.into(),
            }
            .into());
        self
    }

    pub fn max_tokens(mut self, n: i64) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Concatenated text of every string message, newline separated.
    pub fn text_content(&self) -> String {
        self.messages
            .iter()
            .flatten()
            .filter_map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A validated request after provider normalization.
///
/// Model, token ceiling and temperature are resolved; this is what gets
/// fingerprinted and what adapters send upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub provider: Provider,
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keys_are_prefixed() {
        assert_eq!(CallerIdentity::user("42").key(), "user:42");
        assert_eq!(CallerIdentity::session("abc").key(), "session:abc");
    }

    #[test]
    fn envelope_deserializes_with_defaults() {
        let json = r#"{
            "provider": "claude",
            "messages": [{"role": "user", "content": "hello"}],
            "caller": {"user": "7"}
        }"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.provider, Provider::Claude);
        assert_eq!(req.caller, CallerIdentity::user("7"));
        assert!(req.model.is_none());
        assert_eq!(req.text_content(), "hello");
    }

    #[test]
    fn builder_appends_messages() {
        let req = ChatRequest::new(Provider::OpenAi, CallerIdentity::session("s"))
            .message(Role::System, "be brief")
            .message(Role::User, "hi");
        let messages = req.messages.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
    }
}
