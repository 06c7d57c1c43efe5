//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use heimdall::{
    CallerIdentity, ChatCompletion, ChatRequest, HeimdallError, ManualClock, NormalizedRequest,
    Provider, ProviderAdapter, Result, Role, Usage,
};

pub type Script = Box<dyn Fn(u32) -> Result<ChatCompletion> + Send + Sync>;

/// Adapter whose reply to the n-th call (0-indexed) comes from a script.
pub struct MockAdapter {
    provider: Provider,
    script: Script,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockAdapter {
    /// Always answers with a 100-in / 50-out completion.
    pub fn ok(provider: Provider) -> Self {
        Self::scripted(provider, Box::new(|_| Ok(completion("hi there"))))
    }

    pub fn scripted(provider: Provider, script: Script) -> Self {
        Self {
            provider,
            script,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls with a 500, then succeed.
    pub fn failing_first(provider: Provider, n: u32) -> Self {
        Self::scripted(
            provider,
            Box::new(move |i| {
                if i < n {
                    Err(upstream_500())
                } else {
                    Ok(completion("recovered"))
                }
            }),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn temperature_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    async fn send(&self, request: &NormalizedRequest) -> Result<ChatCompletion> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut reply = (self.script)(n)?;
        reply.model = request.model.clone();
        Ok(reply)
    }
}

pub fn completion(content: &str) -> ChatCompletion {
    ChatCompletion {
        id: Some("resp-1".into()),
        model: String::new(),
        content: content.into(),
        finish_reason: Some("stop".into()),
        usage: Usage::new(100, 50),
    }
}

pub fn upstream_500() -> HeimdallError {
    HeimdallError::Upstream {
        status: 500,
        message: "internal server error".into(),
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start()))
}

/// A single-user-message request for `user`.
pub fn ask(provider: Provider, user: &str, text: &str) -> ChatRequest {
    ChatRequest::new(provider, CallerIdentity::user(user))
        .model("m")
        .message(Role::User, text)
}
