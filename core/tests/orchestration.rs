//! Service-level tests against a mock provider: the full pipeline from
//! request validation through context trimming, retry, breaker, and profile
//! merging.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use confab_config::AiConfig;
use confab_core::AiService;
use confab_resilience::CircuitState;
use confab_types::{AiError, BotIdentity, ChatMessage, CompletionRequest, UserProfile};

fn service(server: &MockServer, max_failures: u32, max_context_tokens: u32) -> AiService {
    let config = AiConfig::from_toml_str(&format!(
        r#"
        provider = "openai"
        api_key = "sk-test"
        base_url = "{}"
        max_context_tokens = {max_context_tokens}

        [breaker]
        max_failures = {max_failures}
        reset_interval_secs = 60

        [retry]
        max_attempts = 3
        initial_interval_ms = 1
        max_interval_ms = 5
        "#,
        server.uri()
    ))
    .unwrap();
    AiService::new(&config)
}

fn request() -> CompletionRequest {
    CompletionRequest {
        user_id: 7,
        message: "what did I miss?".to_string(),
        recent_messages: vec![ChatMessage::new(1, "not much", Utc::now())],
        user_profiles: HashMap::new(),
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn happy_path_returns_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("you missed nothing")))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    let reply = service.generate_response(&request()).await.unwrap();
    assert_eq!(reply, "you missed nothing");
    assert_eq!(service.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn invalid_request_never_reaches_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("nope")))
        .expect(0)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    let bad = CompletionRequest {
        user_id: 0,
        ..request()
    };
    let err = service.generate_response(&bad).await.unwrap_err();
    assert!(matches!(err, AiError::Validation(_)));
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("second try")))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    let reply = service.generate_response(&request()).await.unwrap();
    assert_eq!(reply, "second try");
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    let err = service.generate_response(&request()).await.unwrap_err();
    assert!(matches!(err, AiError::PermanentApi { status: 400, .. }));
}

#[tokio::test]
async fn persistent_failures_trip_the_breaker_and_fail_fast() {
    let server = MockServer::start().await;
    // Two transient failures trip a max_failures=2 breaker; the retry loop's
    // third attempt and every later call must be rejected without a request.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let service = service(&server, 2, 4096);
    let err = service.generate_response(&request()).await.unwrap_err();
    assert!(matches!(err, AiError::CircuitOpen));
    assert_eq!(service.circuit_state(), CircuitState::Open);

    let err = service.generate_response(&request()).await.unwrap_err();
    assert!(matches!(err, AiError::CircuitOpen));
}

#[tokio::test]
async fn oversized_history_is_trimmed_before_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(move |req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let messages = body["messages"].as_array().unwrap();
            // system + kept history + current; far fewer than the 20 sent.
            let kept = messages.len() - 2;
            assert!(
                (1..10).contains(&kept),
                "expected a trimmed suffix, got {kept} history messages"
            );
            ResponseTemplate::new(200).set_body_json(completion("ok"))
        })
        .expect(1)
        .mount(&server)
        .await;

    let mut request = request();
    request.recent_messages = (0..20)
        .map(|i| ChatMessage::new(1, format!("message number {i}"), Utc::now()))
        .collect();

    let service = service(&server, 5, 150);
    service.generate_response(&request).await.unwrap();
}

#[tokio::test]
async fn profile_pipeline_merges_and_synthesizes() {
    let server = MockServer::start().await;
    // Model output covers a new user (7), an update with an empty field
    // (42), the bot itself (99), and an uninvolved id (1000).
    let raw = "Here you go:\n```json\n{\"users\":{\
        \"7\":{\"current_location\":\"Lisbon\"},\
        \"42\":{\"display_names\":\"Al\",\"traits\":\"\"},\
        \"99\":{\"traits\":\"definitely human\"},\
        \"1000\":{\"traits\":\"fabricated\"}}}\n```";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(raw)))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    service.set_bot_info(BotIdentity::new(99, "confab_bot", "Confab").unwrap());

    let messages = vec![
        ChatMessage::new(7, "I moved to Lisbon", Utc::now()),
        ChatMessage::new(42, "call me Al", Utc::now()),
    ];
    let mut existing = HashMap::new();
    existing.insert(
        42,
        UserProfile {
            user_id: 42,
            traits: "curious".to_string(),
            ..UserProfile::default()
        },
    );

    let updated = service.generate_profiles(&messages, &existing).await.unwrap();

    assert_eq!(updated.len(), 3);
    assert_eq!(updated[&7].current_location, "Lisbon");
    assert_eq!(updated[&42].display_names, "Al");
    // Empty incoming field keeps the stored value.
    assert_eq!(updated[&42].traits, "curious");
    // Bot profile is synthesized, never taken from model output.
    assert_eq!(updated[&99].traits, "Group Chat Bot");
    assert!(!updated.contains_key(&1000));
    // The input map is left alone.
    assert_eq!(existing.len(), 1);
}

#[tokio::test]
async fn empty_profile_batch_is_rejected_locally() {
    let server = MockServer::start().await;
    let service = service(&server, 5, 4096);
    let err = service
        .generate_profiles(&[], &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Validation(_)));
}

#[tokio::test]
async fn unparseable_profile_output_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("no structured data here")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, 5, 4096);
    let messages = vec![ChatMessage::new(7, "hello", Utc::now())];
    let err = service
        .generate_profiles(&messages, &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Parse(_)));
}
