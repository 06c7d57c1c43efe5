//! Wiremock integration tests for the HTTP provider adapters.
#![cfg(all(feature = "claude", feature = "openai"))]

use heimdall::providers::{ClaudeAdapter, OpenAiAdapter};
use heimdall::{HeimdallError, Message, NormalizedRequest, Provider, ProviderAdapter};

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(provider: Provider, model: &str) -> NormalizedRequest {
    NormalizedRequest {
        provider,
        model: model.into(),
        messages: vec![Message::system("be terse"), Message::user("hello")],
        max_tokens: 256,
        temperature: 0.7,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
    }
}

fn claude_reply() -> serde_json::Value {
    serde_json::json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-haiku-20240307",
        "content": [{"type": "text", "text": "Hi."}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 12, "output_tokens": 3}
    })
}

fn openai_reply() -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hi."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
    })
}

#[tokio::test]
async fn claude_sends_messages_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 256,
            "system": "be terse",
            "messages": [{"role": "user", "content": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_reply()))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = ClaudeAdapter::with_base_url("sk-ant-test", server.uri());
    let reply = adapter
        .send(&request(Provider::Claude, "claude-3-haiku-20240307"))
        .await
        .unwrap();

    assert_eq!(reply.content, "Hi.");
    assert_eq!(reply.usage.prompt_tokens, 12);
    assert_eq!(reply.usage.completion_tokens, 3);
    assert_eq!(reply.finish_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn openai_sends_chat_completion_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply()))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_base_url("sk-test", server.uri());
    let reply = adapter
        .send(&request(Provider::OpenAi, "gpt-4o-mini"))
        .await
        .unwrap();

    assert_eq!(reply.content, "Hi.");
    assert_eq!(reply.id.as_deref(), Some("chatcmpl-1"));
    assert_eq!(reply.usage.total_tokens(), 15);
}

#[tokio::test]
async fn auth_failure_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let adapter = ClaudeAdapter::with_base_url("bad", server.uri());
    let err = adapter
        .send(&request(Provider::Claude, "claude-3-haiku-20240307"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::AuthenticationFailed));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_errors_are_transient_and_keep_the_body_private() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded: upstream-node-7"))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_base_url("sk-test", server.uri());
    let err = adapter
        .send(&request(Provider::OpenAi, "gpt-4o-mini"))
        .await
        .unwrap_err();
    match &err {
        HeimdallError::Upstream { status, message } => {
            assert_eq!(*status, 503);
            assert!(message.contains("upstream-node-7"));
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
    assert!(err.is_transient());
    assert!(!err.public_message().contains("upstream-node-7"));
}

#[tokio::test]
async fn empty_choices_is_an_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": []
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_base_url("sk-test", server.uri());
    let err = adapter
        .send(&request(Provider::OpenAi, "gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::EmptyResponse));
}

#[tokio::test]
async fn gateway_routes_through_configured_base_url() {
    use heimdall::config::{ApiKeySecret, ApiProviderConfig, Config, Secrets};
    use heimdall::{CallerIdentity, ChatRequest, ClientMeta, HeimdallBuilder, Role};
    use tokio_util::sync::CancellationToken;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(serde_json::json!({"model": "claude-3-haiku-20240307"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_reply()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.providers.claude = Some(ApiProviderConfig {
        default_model: Some("claude-3-haiku-20240307".into()),
        base_url: Some(server.uri()),
    });
    let secrets = Secrets {
        claude: Some(ApiKeySecret {
            api_key: "sk-ant-test".into(),
        }),
        openai: None,
    };
    let gateway = HeimdallBuilder::from_config(&config, &secrets).build().unwrap();

    let request = ChatRequest::new(Provider::Claude, CallerIdentity::user("u1"))
        .message(Role::User, "hello");
    let response = gateway
        .handle(request, &ClientMeta::new(), &CancellationToken::new())
        .await;

    assert!(response.success);
    assert_eq!(response.data.unwrap().content, "Hi.");
    assert!(response.cost > 0.0);
}
