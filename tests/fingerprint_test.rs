//! Tests for request normalization and cache fingerprints.

mod common;

use common::MockAdapter;
use heimdall::cache::fingerprint;
use heimdall::providers::TokenLimits;
use heimdall::{CallerIdentity, ChatRequest, Provider, ProviderAdapter, Role};

fn normalize(adapter: &MockAdapter, request: &ChatRequest) -> heimdall::NormalizedRequest {
    let messages = heimdall::security::SecurityClassifier::default()
        .validate_structure(request)
        .unwrap();
    adapter.normalize(request, messages, TokenLimits::default())
}

fn base(caller: CallerIdentity) -> ChatRequest {
    ChatRequest::new(Provider::Claude, caller)
        .model("m")
        .message(Role::User, "hello")
}

#[test]
fn identity_stream_flag_and_fine_temperature_do_not_matter() {
    let adapter = MockAdapter::ok(Provider::Claude);
    let a = normalize(&adapter, &base(CallerIdentity::user("u1")).temperature(0.71));
    let b = normalize(
        &adapter,
        &base(CallerIdentity::session("s9")).temperature(0.74).stream(true),
    );
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn content_model_and_token_budget_do_matter() {
    let adapter = MockAdapter::ok(Provider::Claude);
    let reference = fingerprint(&normalize(&adapter, &base(CallerIdentity::user("u1"))));

    let other_text = ChatRequest::new(Provider::Claude, CallerIdentity::user("u1"))
        .model("m")
        .message(Role::User, "goodbye");
    let other_model = base(CallerIdentity::user("u1")).model("m2");
    let other_budget = base(CallerIdentity::user("u1")).max_tokens(10);
    let other_temp = base(CallerIdentity::user("u1")).temperature(0.2);

    for request in [other_text, other_model, other_budget, other_temp] {
        assert_ne!(fingerprint(&normalize(&adapter, &request)), reference);
    }
}

#[test]
fn providers_never_share_fingerprints() {
    let claude = MockAdapter::ok(Provider::Claude);
    let openai = MockAdapter::ok(Provider::OpenAi);
    let a = normalize(&claude, &base(CallerIdentity::user("u1")));
    let mut request = base(CallerIdentity::user("u1"));
    request.provider = Provider::OpenAi;
    let b = normalize(&openai, &request);
    assert_ne!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn normalization_fills_defaults_and_clamps() {
    let adapter = MockAdapter::ok(Provider::Claude);
    let request = ChatRequest::new(Provider::Claude, CallerIdentity::user("u1"))
        .message(Role::User, "hello")
        .temperature(1.8);
    let normalized = normalize(&adapter, &request);
    assert_eq!(normalized.model, "mock-model");
    assert_eq!(normalized.max_tokens, 1000);
    assert_eq!(normalized.temperature, 1.0);
    assert_eq!(fingerprint(&normalized).as_str().len(), 64);
}
