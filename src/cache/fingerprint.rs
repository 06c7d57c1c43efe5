//! Request fingerprinting.
//!
//! The digest covers provider, model, the message sequence, the token
//! ceiling and the temperature rounded to one decimal place. Streaming,
//! caller identity, `top_p` and the penalty parameters are left out, so
//! requests that differ only in those fields share a cache entry.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{Message, NormalizedRequest};

/// Hex-encoded SHA-256 of a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    /// Temperature in tenths, so 0.71 and 0.74 both become 7.
    temperature: i64,
}

/// Compute the fingerprint of `request`.
pub fn fingerprint(request: &NormalizedRequest) -> Fingerprint {
    let canonical = CanonicalRequest {
        model: &request.model,
        messages: &request.messages,
        max_tokens: request.max_tokens,
        temperature: round_tenths(request.temperature),
    };
    // Serializing a struct of strings and integers cannot fail.
    let body = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(request.provider.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();

    Fingerprint(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn round_tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;

    fn request(temperature: f64) -> NormalizedRequest {
        NormalizedRequest {
            provider: Provider::Claude,
            model: "claude-3-sonnet-20240229".into(),
            messages: vec![Message::user("hello")],
            max_tokens: 1000,
            temperature,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = fingerprint(&request(0.7));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn temperature_rounds_to_one_decimal() {
        assert_eq!(round_tenths(0.71), 7);
        assert_eq!(round_tenths(0.74), 7);
        assert_eq!(round_tenths(0.76), 8);
        assert_eq!(fingerprint(&request(0.71)), fingerprint(&request(0.74)));
        assert_ne!(fingerprint(&request(0.7)), fingerprint(&request(0.8)));
    }

    #[test]
    fn penalties_and_top_p_are_ignored() {
        let mut other = request(0.7);
        other.top_p = Some(0.9);
        other.frequency_penalty = Some(1.0);
        other.presence_penalty = Some(0.5);
        assert_eq!(fingerprint(&request(0.7)), fingerprint(&other));
    }

    #[test]
    fn provider_and_messages_matter() {
        let mut other = request(0.7);
        other.provider = Provider::OpenAi;
        assert_ne!(fingerprint(&request(0.7)), fingerprint(&other));

        let mut other = request(0.7);
        other.messages.push(Message::assistant("hi"));
        assert_ne!(fingerprint(&request(0.7)), fingerprint(&other));
    }
}
