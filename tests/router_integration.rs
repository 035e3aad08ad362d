//! End-to-end scenarios driven through the real `Service` entry point against
//! `wiremock`-backed stand-ins for each provider's HTTP surface, rather than
//! through `FakeAdapter` — these exercise the actual wire adapters alongside
//! the resilience pipeline, not just the pipeline logic in isolation.

use std::time::Duration;

use llm_router_core::config::{BackendConfig, BackendType, CircuitBreakerConfig, RootConfig, SelectionStrategy};
use llm_router_core::plugin::PluginRegistry;
use llm_router_core::request::ChatRequest;
use llm_router_core::service::Service;
use llm_router_core::ChatMessage;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_backend(name: &str, base_url: &str, priority: u32) -> BackendConfig {
    let mut cfg = BackendConfig::new(name, BackendType::OpenAi, base_url, "gpt-4o");
    cfg.api_key = "test-key".to_string();
    cfg.priority = priority;
    cfg
}

fn openai_success_body(text: &str) -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 7}
    })
}

/// Scenario: a broken primary backend fails over to a healthy secondary.
#[tokio::test]
async fn failover_reaches_healthy_secondary_backend() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "boom"}})))
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("hi from secondary")))
        .mount(&secondary)
        .await;

    let mut settings = RootConfig::default();
    settings.selection_strategy = SelectionStrategy::Failover;
    settings.max_retries = 0;
    settings.backends = vec![openai_backend("primary", &primary.uri(), 0), openai_backend("secondary", &secondary.uri(), 1)];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hello")])).await;
    assert!(response.success);
    assert_eq!(response.backend, "secondary");
    assert_eq!(response.text, "hi from secondary");
}

/// Scenario: `Simultaneous` fans out to every candidate and aggregates,
/// surfacing the winner as the primary response and the rest as alternatives.
#[tokio::test]
async fn simultaneous_strategy_aggregates_across_backends() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "rate limited"}})))
        .mount(&a)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("winner")))
        .mount(&b)
        .await;

    let mut settings = RootConfig::default();
    settings.selection_strategy = SelectionStrategy::Simultaneous;
    settings.max_retries = 0;
    settings.backends = vec![openai_backend("a", &a.uri(), 0), openai_backend("b", &b.uri(), 1)];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hello")])).await;
    assert!(response.success);
    assert_eq!(response.backend, "b");
    assert_eq!(response.alternative_responses.len(), 1);
    assert!(!response.alternative_responses[0].success);
}

/// Scenario: round robin alternates strictly between two healthy backends,
/// matching the X, Y, X, Y sequence.
#[tokio::test]
async fn round_robin_alternates_between_backends() {
    let x = MockServer::start().await;
    let y = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("from-x")))
        .mount(&x)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("from-y")))
        .mount(&y)
        .await;

    let mut settings = RootConfig::default();
    settings.selection_strategy = SelectionStrategy::RoundRobin;
    settings.backends = vec![openai_backend("x", &x.uri(), 0), openai_backend("y", &y.uri(), 0)];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
        let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hi")])).await;
        assert!(response.success);
        order.push(response.backend);
    }
    assert_eq!(order, vec!["x", "y", "x", "y"]);
}

/// Scenario: a backend's spend budget is exhausted mid-run and the router
/// stops dispatching to it, without ever contacting it again.
#[tokio::test]
async fn budget_exceeded_auto_disables_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("ok")))
        .mount(&server)
        .await;

    let mut backend = openai_backend("metered", &server.uri(), 0);
    backend.max_spend_usd = Some(0.00006);
    backend.cost_per_million_input_tokens = 1000.0;
    backend.cost_per_million_output_tokens = 1000.0;

    let mut settings = RootConfig::default();
    settings.backends = vec![backend];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    // Each call costs (5 + 7) / 1_000_000 * 1000 = 0.000012 usd; five calls
    // exhaust a 0.00006 budget exactly.
    for _ in 0..5 {
        let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hi")])).await;
        assert!(response.success);
    }

    let exhausted = service.chat(ChatRequest::new(vec![ChatMessage::user("hi")])).await;
    assert!(!exhausted.success);
    assert_eq!(exhausted.error_kind, Some(llm_router_core::ErrorKind::BudgetExceeded));
}

/// Scenario: repeated failures trip the circuit; once open, the router fails
/// fast without making further HTTP calls, then recovers after the break
/// duration elapses and the single half-open probe succeeds.
#[tokio::test]
async fn circuit_trips_then_recovers_after_break_duration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "down"}})))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success_body("recovered")))
        .mount(&server)
        .await;

    let mut backend = openai_backend("flaky", &server.uri(), 0);
    let mut settings = RootConfig::default();
    settings.max_retries = 0;
    settings.circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        duration_of_break_seconds: 0,
        sampling_duration_seconds: 3600,
        minimum_throughput: 3,
    };
    backend.priority = 0;
    settings.backends = vec![backend];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    for _ in 0..3 {
        let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hi")])).await;
        assert!(!response.success);
    }
    assert_eq!(service.get_backend("flaky").unwrap().circuit_state(), llm_router_core::CircuitState::Open);

    // Break duration is 0s, so the very next call is allowed through as a
    // half-open probe and the mock server is now answering successfully.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let probe = service.chat(ChatRequest::new(vec![ChatMessage::user("hi")])).await;
    assert!(probe.success);
    assert_eq!(service.get_backend("flaky").unwrap().circuit_state(), llm_router_core::CircuitState::Closed);
}

/// Scenario: Anthropic's adapter extracts system messages into the top-level
/// `system` field and never lets them travel inside `messages` — asserted
/// against the actual wire body the mock server receives.
#[tokio::test]
async fn anthropic_request_extracts_system_message_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "terse reply"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 3}
        })))
        .mount(&server)
        .await;

    let mut backend = BackendConfig::new("claude", BackendType::Anthropic, server.uri(), "claude-3-5-sonnet-20241022");
    backend.api_key = "test-key".to_string();

    let mut settings = RootConfig::default();
    settings.backends = vec![backend];

    let registry = PluginRegistry::new();
    let service = Service::new(settings, &registry).unwrap();

    let response = service
        .chat(ChatRequest::new(vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]))
        .await;
    assert!(response.success);
    assert_eq!(response.text, "terse reply");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["system"], "be terse");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}
