//! End-to-end coverage of the optional `chat_stream` extension, built
//! directly on the per-backend adapters (bypassing `Service`, since streaming
//! is adapter-level and the router's retry/circuit pipeline only deals in
//! buffered `Response`s).

use futures::StreamExt;
use llm_router_core::adapters::ollama::OllamaAdapter;
use llm_router_core::adapters::openai::OpenAiAdapter;
use llm_router_core::config::{BackendConfig, BackendType};
use llm_router_core::request::ChatRequest;
use llm_router_core::Adapter;
use llm_router_core::ChatMessage;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn openai_chat_stream_yields_concatenated_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut cfg = BackendConfig::new("openai", BackendType::OpenAi, server.uri(), "gpt-4o");
    cfg.api_key = "k".to_string();
    let adapter = OpenAiAdapter::new(cfg, reqwest::Client::new());

    let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
    let stream = adapter.chat_stream(&request).await.unwrap();
    let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
    assert_eq!(deltas.concat(), "Hello");
}

#[tokio::test]
async fn ollama_chat_stream_decodes_ndjson_lines() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let cfg = BackendConfig::new("ollama", BackendType::Ollama, server.uri(), "llama3");
    let adapter = OllamaAdapter::new(cfg, reqwest::Client::new());

    let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
    let stream = adapter.chat_stream(&request).await.unwrap();
    let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
    assert_eq!(deltas.concat(), "Hello");
}

/// Cohere never implements the streaming extension; the default trait method
/// surfaces that explicitly rather than silently buffering.
#[tokio::test]
async fn cohere_chat_stream_is_unsupported() {
    use llm_router_core::adapters::cohere::CohereAdapter;

    let cfg = BackendConfig::new("cohere", BackendType::Cohere, "http://example.invalid", "command-r-plus");
    let adapter = CohereAdapter::new(cfg, reqwest::Client::new());
    let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
    let result = adapter.chat_stream(&request).await;
    assert!(result.is_err());
}
