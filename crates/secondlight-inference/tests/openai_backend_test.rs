//! Integration tests for the OpenAI backend against a mock HTTP server.
//!
//! Covers request shape (auth header, system prompt, temperature) and the
//! retry policy: transient failures are retried with backoff, everything
//! else fails on the first attempt.

#![cfg(feature = "openai")]

use std::time::Duration;

use secondlight_core::{Error, GenerationBackend};
use secondlight_inference::openai::{OpenAIBackend, OpenAIConfig};
use secondlight_inference::RetryPolicy;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_response(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

fn config_for(server: &MockServer, max_retries: u32) -> OpenAIConfig {
    OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        gen_model: "test-gen".to_string(),
        temperature: Some(0.1),
        timeout_seconds: 5,
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        },
    }
}

#[tokio::test]
async fn test_request_carries_auth_and_system_prompt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-gen",
            "messages": [
                {"role": "system", "content": "You are a medical analyst."},
                {"role": "user", "content": "Hemoglobin 13.5 g/dL"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("{\"summary\":\"ok\"}")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 0)).expect("backend");
    let reply = backend
        .generate_with_system("You are a medical analyst.", "Hemoglobin 13.5 g/dL")
        .await
        .expect("generation should succeed");

    assert_eq!(reply, "{\"summary\":\"ok\"}");
}

#[tokio::test]
async fn test_empty_system_prompt_sends_only_user_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("hello")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 0)).expect("backend");
    assert_eq!(backend.generate("hi").await.unwrap(), "hello");
}

#[tokio::test]
async fn test_server_errors_are_retried_then_succeed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": {"message": "overloaded", "type": "server_error"}
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("recovered")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 2)).expect("backend");
    assert_eq!(backend.generate("x").await.unwrap(), "recovered");
}

#[tokio::test]
async fn test_rate_limit_exhausts_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "slow down", "type": "rate_limit_exceeded"}
        })))
        .expect(3)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 2)).expect("backend");
    let err = backend.generate("x").await.unwrap_err();

    assert!(matches!(err, Error::Inference(_)));
    assert!(err.to_string().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "bad key", "type": "invalid_api_key"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 2)).expect("backend");
    let err = backend.generate("x").await.unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("Authentication failed"));
}

#[tokio::test]
async fn test_timeout_is_retried_and_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = OpenAIConfig {
        timeout_seconds: 1,
        ..config_for(&mock_server, 1)
    };
    let backend = OpenAIBackend::new(config).expect("backend");
    let err = backend.generate("x").await.unwrap_err();

    assert!(err.to_string().contains("timed out"), "got: {}", err);
}

#[tokio::test]
async fn test_missing_choices_yield_empty_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x", "choices": []})),
        )
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config_for(&mock_server, 0)).expect("backend");
    assert_eq!(backend.generate("x").await.unwrap(), "");
}
