//! OpenAI and OpenAI-compatible chat completions adapter.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, Role};
use crate::response::Response;

use super::Adapter;

pub struct OpenAiAdapter {
    config: BackendConfig,
    client: Client,
}

impl OpenAiAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> Result<HeaderMap, RouterError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| RouterError::Internal(format!("invalid api key: {e}")))?,
        );
        if let Some(org) = &self.config.organization_id {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|e| RouterError::Internal(format!("invalid organization id: {e}")))?,
            );
        }
        for (key, value) in &self.config.additional_headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| RouterError::Internal(format!("invalid header name '{key}': {e}")))?;
            headers.insert(name, HeaderValue::from_str(value).map_err(|e| RouterError::Internal(format!("invalid header value: {e}")))?);
        }
        Ok(headers)
    }

    fn is_o_series_model(&self) -> bool {
        self.config.model_name.starts_with("o1") || self.config.model_name.starts_with("o3") || self.config.model_name.starts_with("o4")
    }

    fn convert_request(&self, request: &ChatRequest) -> WireRequest {
        let messages = request.messages.iter().map(WireMessage::from).collect();
        let o_series = self.is_o_series_model();
        let max_tokens = request.max_tokens.or(self.config.max_output_tokens);
        WireRequest {
            model: self.config.model_name.clone(),
            messages,
            temperature: if o_series { Some(1.0) } else { request.temperature.or(self.config.temperature) },
            max_tokens: if o_series { None } else { max_tokens },
            max_completion_tokens: if o_series { max_tokens } else { None },
            top_p: request.top_p.or(self.config.top_p),
            frequency_penalty: request.frequency_penalty.or(self.config.frequency_penalty),
            presence_penalty: request.presence_penalty.or(self.config.presence_penalty),
            stop: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
        }
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        let headers = match self.build_headers() {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.client
            .get(format!("{}/models", self.config.base_url.trim_end_matches('/')))
            .headers(headers)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let headers = self.build_headers()?;
        let body = self.convert_request(request);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let start = Instant::now();
        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "openai request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp
            .json()
            .await
            .map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Deserialization("openai response had no choices".to_string()))?;

        debug!(backend = %self.config.name, model = %parsed.model, "openai request succeeded");

        Ok(Response::success(&self.config.name, parsed.model, choice.message.content)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_usage(parsed.usage.prompt_tokens, parsed.usage.completion_tokens)
            .with_finish_reason(choice.finish_reason.unwrap_or_default()))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, RouterError>>, RouterError> {
        use futures::StreamExt;

        let headers = self.build_headers()?;
        let mut body = self.convert_request(request);
        body.stream = true;
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }

        let deltas = super::sse_data_stream(resp).map(|event| {
            let data = event?;
            let chunk: StreamChunk = serde_json::from_str(&data).map_err(|e| RouterError::Deserialization(e.to_string()))?;
            Ok(chunk.choices.into_iter().next().and_then(|c| c.delta.content).unwrap_or_default())
        });
        Ok(deltas.boxed())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&crate::request::ChatMessage> for WireMessage {
    fn from(m: &crate::request::ChatMessage) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        WireMessage { role: role.to_string(), content: m.content.clone() }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::request::ChatMessage;

    fn adapter() -> OpenAiAdapter {
        let config = BackendConfig::new("openai-primary", BackendType::OpenAi, "https://api.openai.com/v1", "gpt-4o");
        OpenAiAdapter::new(config, Client::new())
    }

    #[test]
    fn o_series_model_forces_temperature_one_and_completion_tokens_field() {
        let mut config = BackendConfig::new("o", BackendType::OpenAi, "http://x", "o4-mini");
        config.api_key = "k".to_string();
        let adapter = OpenAiAdapter::new(config, Client::new());
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.temperature, Some(1.0));
        assert!(wire.max_tokens.is_none());
    }

    #[test]
    fn regular_model_keeps_requested_temperature() {
        let adapter = adapter();
        let mut req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        req.temperature = Some(0.2);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.temperature, Some(0.2));
    }

    #[test]
    fn stream_chunk_extracts_delta_content() {
        let raw = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));
    }
}
