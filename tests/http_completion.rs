use cellmind::core::config::CompletionConfig;
use cellmind::core::error::CompletionError;
use cellmind::providers::{
    CompletionRequest, CompletionService, HttpCompletionService, Message, RetryPolicy,
    RetryingCompletionService,
};
use httpmock::prelude::*;
use std::time::Duration;

fn config(api_key: Option<&str>) -> CompletionConfig {
    CompletionConfig {
        api_key: api_key.map(str::to_string),
        ..CompletionConfig::default()
    }
}

fn request(endpoint: &str) -> CompletionRequest {
    CompletionRequest {
        endpoint: endpoint.to_string(),
        model: "test-model".to_string(),
        messages: vec![
            Message::system("Answer briefly."),
            Message::user("What colour is the sky?"),
        ],
        temperature: 0.0,
        max_tokens: 64,
        stream: false,
    }
}

#[tokio::test]
async fn test_returns_first_choice_content() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_contains("\"model\":\"test-model\"")
            .body_contains("\"stream\":false");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{ "choices": [ { "message": { "role": "assistant", "content": "Blue." } } ] }"#);
    });

    let service = HttpCompletionService::new(&config(Some("k"))).unwrap();
    let text = service.complete(&request(&server.url("/v1/"))).await.unwrap();

    assert_eq!(text, "Blue.");
    mock.assert();
}

#[tokio::test]
async fn test_sends_bearer_key_when_configured() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer secret-key");
        then.status(200)
            .body(r#"{ "choices": [ { "message": { "content": "ok" } } ] }"#);
    });

    let service = HttpCompletionService::new(&config(Some("secret-key"))).unwrap();
    service.complete(&request(&server.base_url())).await.unwrap();
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_non_success_status_is_transport_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(503).body("overloaded");
    });

    let service = HttpCompletionService::new(&config(Some("k"))).unwrap();
    let err = service.complete(&request(&server.base_url())).await.unwrap_err();

    match err {
        CompletionError::Transport { status, .. } => assert_eq!(status, Some(503)),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_choices_is_protocol_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).body(r#"{ "id": "x", "choices": [] }"#);
    });

    let service = HttpCompletionService::new(&config(Some("k"))).unwrap();
    let err = service.complete(&request(&server.base_url())).await.unwrap_err();
    assert!(matches!(err, CompletionError::Protocol { .. }));
}

#[tokio::test]
async fn test_retry_layer_gives_up_after_max_attempts() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(500).body("boom");
    });

    let http = HttpCompletionService::new(&config(Some("k"))).unwrap();
    let service = RetryingCompletionService::new(
        http,
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        },
    );

    let err = service.complete(&request(&server.base_url())).await.unwrap_err();
    assert!(matches!(err, CompletionError::Transport { status: Some(500), .. }));
    assert_eq!(mock.hits(), 3);
}
