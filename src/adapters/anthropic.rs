//! Anthropic Messages API adapter.
//!
//! System messages never travel inside `messages` — Anthropic takes them as
//! a top-level `system` field, so every system message in the neutral
//! request is extracted and concatenated there instead.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, Role};
use crate::response::Response;

use super::Adapter;

const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicAdapter {
    config: BackendConfig,
    client: Client,
}

impl AnthropicAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> Result<HeaderMap, RouterError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| RouterError::Internal(format!("invalid api key: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(self.config.anthropic_version.as_deref().unwrap_or(DEFAULT_API_VERSION))
                .map_err(|e| RouterError::Internal(format!("invalid api version: {e}")))?,
        );
        Ok(headers)
    }

    fn convert_request(&self, request: &ChatRequest) -> WireRequest {
        let mut system_prompt: Option<String> = None;
        let mut messages = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    system_prompt = Some(match system_prompt.take() {
                        Some(existing) => format!("{existing}\n{}", msg.content),
                        None => msg.content.clone(),
                    });
                }
                Role::User => messages.push(WireMessage { role: "user".to_string(), content: msg.content.clone() }),
                Role::Assistant => messages.push(WireMessage { role: "assistant".to_string(), content: msg.content.clone() }),
            }
        }

        WireRequest {
            model: self.config.model_name.clone(),
            messages,
            max_tokens: request.max_tokens.or(self.config.max_output_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature.or(self.config.temperature),
            top_p: request.top_p.or(self.config.top_p),
            stop_sequences: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
            system: system_prompt,
        }
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        let headers = match self.build_headers() {
            Ok(h) => h,
            Err(_) => return false,
        };
        // Anthropic has no unauthenticated health endpoint; a minimal
        // messages call with max_tokens=1 is the cheapest real probe. There's
        // no dedicated health endpoint to answer this, so a 4xx validation
        // error (e.g. the probe model/shape being rejected) still counts as
        // "reachable and authenticated" — only 401/403/5xx/transport errors
        // mean the backend isn't available.
        let probe = WireRequest {
            model: self.config.model_name.clone(),
            messages: vec![WireMessage { role: "user".to_string(), content: "ping".to_string() }],
            max_tokens: 1,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            system: None,
        };
        match self
            .client
            .post(format!("{}/v1/messages", self.config.base_url.trim_end_matches('/')))
            .headers(headers)
            .json(&probe)
            .send()
            .await
        {
            Ok(r) => super::status_implies_available(r.status()),
            Err(_) => false,
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let headers = self.build_headers()?;
        let body = self.convert_request(request);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let start = Instant::now();
        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "anthropic request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        let text = parsed.content.into_iter().map(|block| block.text).collect::<Vec<_>>().join("");

        debug!(backend = %self.config.name, "anthropic request succeeded");

        Ok(Response::success(&self.config.name, parsed.model, text)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_usage(parsed.usage.input_tokens, parsed.usage.output_tokens)
            .with_finish_reason(parsed.stop_reason.unwrap_or_default()))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, RouterError>>, RouterError> {
        use futures::StreamExt;

        let headers = self.build_headers()?;
        let mut body = self.convert_request(request);
        body.stream = true;
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }

        // Anthropic's SSE stream interleaves several event types
        // (message_start, content_block_delta, message_delta, ...); only
        // content_block_delta carries text, so other shapes decode to "".
        let deltas = super::sse_data_stream(resp).map(|event| {
            let data = event?;
            let chunk: StreamEvent = serde_json::from_str(&data).map_err(|e| RouterError::Deserialization(e.to_string()))?;
            Ok(chunk.delta.and_then(|d| d.text).unwrap_or_default())
        });
        Ok(deltas.boxed())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::request::ChatMessage;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> AnthropicAdapter {
        let config = BackendConfig::new("claude", BackendType::Anthropic, "https://api.anthropic.com", "claude-3-5-sonnet-20241022");
        AnthropicAdapter::new(config, Client::new())
    }

    fn adapter_for(uri: &str) -> AnthropicAdapter {
        let mut config = BackendConfig::new("claude", BackendType::Anthropic, uri, "claude-3-5-sonnet-20241022");
        config.api_key = "k".to_string();
        AnthropicAdapter::new(config, Client::new())
    }

    #[tokio::test]
    async fn is_available_true_on_bad_request_probe_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(400)).mount(&server).await;
        assert!(adapter_for(&server.uri()).is_available().await);
    }

    #[tokio::test]
    async fn is_available_false_on_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(401)).mount(&server).await;
        assert!(!adapter_for(&server.uri()).is_available().await);
    }

    #[test]
    fn system_message_extracted_to_top_level_field() {
        let adapter = adapter();
        let req = ChatRequest::new(vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.system, Some("be terse".to_string()));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[test]
    fn missing_max_tokens_defaults_to_1024() {
        let adapter = adapter();
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.max_tokens, 1024);
    }

    #[test]
    fn multiple_system_messages_are_concatenated() {
        let adapter = adapter();
        let req = ChatRequest::new(vec![ChatMessage::system("a"), ChatMessage::system("b"), ChatMessage::user("hi")]);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.system, Some("a\nb".to_string()));
    }

    #[test]
    fn content_block_delta_event_yields_text() {
        let raw = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("hi"));
    }

    #[test]
    fn message_start_event_has_no_text_delta() {
        let raw = r#"{"type":"message_start"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(event.delta.is_none());
    }
}
