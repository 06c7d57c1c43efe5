//! Request screening: client checks, structural validation and threat
//! classification.
//!
//! The gateway runs the three checks cheapest first:
//!
//! 1. [`SecurityClassifier::validate_client`]: user agent and IP blocklists,
//!    before any content is read.
//! 2. [`SecurityClassifier::validate_structure`]: message list shape and
//!    parameter bounds. Produces the typed message list.
//! 3. [`SecurityClassifier::classify`]: regex patterns, length and
//!    repetition heuristics. The result is the maximum severity found.

pub mod patterns;

pub use patterns::ThreatCategory;

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::telemetry;
use crate::types::{ChatRequest, ClientMeta, Message, Role, ThreatLevel};
use crate::{HeimdallError, Result};

use patterns::PATTERNS;

/// Configuration for the security classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Case-insensitive substrings that block a user agent.
    pub blocked_user_agents: Vec<String>,
    pub blocked_ips: Vec<IpAddr>,
    /// Combined content length above which a request is at least medium. Default: 32,000.
    pub max_message_length: usize,
    /// Maximum number of messages per request. Default: 50.
    pub max_messages: usize,
    /// Combined content size rejected outright. Default: 1 MiB.
    pub max_request_bytes: usize,
    /// Upper bound for `max_tokens`. Default: 4096.
    pub max_tokens_ceiling: u32,
    /// Share of the most frequent word above which content counts as flooding. Default: 0.3.
    pub repetition_ratio: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_user_agents: ["scanner", "bot", "crawler", "spider", "scraper"]
                .into_iter()
                .map(String::from)
                .collect(),
            blocked_ips: Vec::new(),
            max_message_length: 32_000,
            max_messages: 50,
            max_request_bytes: 1024 * 1024,
            max_tokens_ceiling: 4096,
            repetition_ratio: 0.3,
        }
    }
}

impl SecurityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_ip(mut self, ip: IpAddr) -> Self {
        self.blocked_ips.push(ip);
        self
    }

    pub fn block_user_agent(mut self, needle: impl Into<String>) -> Self {
        self.blocked_user_agents.push(needle.into());
        self
    }

    pub fn max_message_length(mut self, n: usize) -> Self {
        self.max_message_length = n;
        self
    }

    pub fn max_messages(mut self, n: usize) -> Self {
        self.max_messages = n;
        self
    }

    pub fn max_tokens_ceiling(mut self, n: u32) -> Self {
        self.max_tokens_ceiling = n;
        self
    }
}

/// Outcome of threat classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub level: ThreatLevel,
    pub issues: Vec<String>,
    pub categories: Vec<ThreatCategory>,
}

impl Classification {
    pub fn is_critical(&self) -> bool {
        self.level == ThreatLevel::Critical
    }
}

/// Stateless request screener.
#[derive(Debug, Clone, Default)]
pub struct SecurityClassifier {
    config: SecurityConfig,
}

impl SecurityClassifier {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Check user agent, direct IP and forwarded IPs against the blocklists.
    pub fn validate_client(&self, client: &ClientMeta) -> Result<()> {
        if let Some(ua) = &client.user_agent {
            let ua = ua.to_lowercase();
            if let Some(needle) = self
                .config
                .blocked_user_agents
                .iter()
                .find(|needle| ua.contains(&needle.to_lowercase()))
            {
                return Err(HeimdallError::BlockedClient {
                    reason: format!("blocked user agent: {needle}"),
                });
            }
        }

        if let Some(ip) = client.ip
            && self.config.blocked_ips.contains(&ip)
        {
            return Err(HeimdallError::BlockedClient {
                reason: format!("blocked IP address: {ip}"),
            });
        }

        let forwarded = client
            .forwarded_for
            .iter()
            .flat_map(|header| header.split(','))
            .filter_map(|part| part.trim().parse::<IpAddr>().ok());
        for ip in forwarded {
            if self.config.blocked_ips.contains(&ip) {
                return Err(HeimdallError::BlockedClient {
                    reason: format!("blocked forwarded IP: {ip}"),
                });
            }
        }
        Ok(())
    }

    /// Validate message list shape and parameter bounds.
    ///
    /// Returns the typed messages, or [`HeimdallError::Validation`]
    /// naming the first problem found.
    pub fn validate_structure(&self, request: &ChatRequest) -> Result<Vec<Message>> {
        let invalid = |msg: String| Err(HeimdallError::Validation(msg));

        let Some(inbound) = &request.messages else {
            return invalid("missing required 'messages' field".into());
        };
        if inbound.is_empty() {
            return invalid("at least one message is required".into());
        }
        if inbound.len() > self.config.max_messages {
            return invalid(format!(
                "too many messages: {} > {}",
                inbound.len(),
                self.config.max_messages
            ));
        }

        let mut messages = Vec::with_capacity(inbound.len());
        let mut total_bytes = 0usize;
        for (i, m) in inbound.iter().enumerate() {
            let Some(role) = Role::parse(&m.role) else {
                return invalid(format!("message {i} has invalid role: {}", m.role));
            };
            let Some(content) = m.content.as_str() else {
                return invalid(format!("message {i} content must be a string"));
            };
            total_bytes += content.len();
            messages.push(Message {
                role,
                content: content.to_string(),
            });
        }

        if messages[0].role == Role::Assistant {
            return invalid("first message must be from user or system".into());
        }
        if total_bytes > self.config.max_request_bytes {
            return invalid(format!(
                "request too large: {total_bytes} > {} bytes",
                self.config.max_request_bytes
            ));
        }
        if let Some(n) = request.max_tokens
            && (n < 1 || n > i64::from(self.config.max_tokens_ceiling))
        {
            return invalid(format!("invalid max_tokens: {n}"));
        }
        if let Some(t) = request.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return invalid(format!("invalid temperature: {t}"));
        }
        Ok(messages)
    }

    /// Assign a threat level to `content`.
    ///
    /// Every rule runs; the level is the maximum severity any rule found.
    /// Two or more distinct categories at high or above escalate to critical.
    pub fn classify(&self, content: &str) -> Classification {
        let mut level = ThreatLevel::Low;
        let mut issues = Vec::new();
        let mut matched = BTreeSet::new();

        for pattern in PATTERNS.iter() {
            if pattern.regex.is_match(content) && matched.insert(pattern.category) {
                issues.push(format!("{} pattern detected", pattern.category));
                level = level.max(pattern.category.severity());
            }
        }

        let severe = matched
            .iter()
            .filter(|c| c.severity() >= ThreatLevel::High)
            .count();
        if severe >= 2 {
            level = ThreatLevel::Critical;
        }

        let length = content.chars().count();
        if length > self.config.max_message_length {
            issues.push(format!(
                "content too long: {length} > {}",
                self.config.max_message_length
            ));
            level = level.max(ThreatLevel::Medium);
        }

        if self.is_repetitive(content) {
            issues.push("excessive word repetition detected".into());
            level = level.max(ThreatLevel::Medium);
        }

        metrics::counter!(telemetry::THREAT_CLASSIFICATIONS_TOTAL, "level" => level.as_str())
            .increment(1);
        if level > ThreatLevel::Low {
            debug!(%level, ?issues, "content classified");
        }

        Classification {
            level,
            issues,
            categories: matched.into_iter().collect(),
        }
    }

    fn is_repetitive(&self, content: &str) -> bool {
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.len() <= 10 {
            return false;
        }
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for &word in &words {
            *freq.entry(word).or_default() += 1;
        }
        let max = freq.values().copied().max().unwrap_or(0);
        max as f64 > words.len() as f64 * self.config.repetition_ratio
    }
}
