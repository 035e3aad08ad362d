//! Generic OpenAI-compatible adapter.
//!
//! Many self-hosted and third-party servers (vLLM, text-generation-webui,
//! LocalAI, and the like) speak the same `/v1/chat/completions` wire format
//! as OpenAI but don't require an API key and don't need the o-series
//! temperature/`max_completion_tokens` special-casing. This adapter is the
//! same shape as [`super::openai::OpenAiAdapter`] minus that provider-specific
//! behavior, with a fully caller-supplied `base_url`.

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

pub struct GenericOpenAiCompatibleAdapter {
    config: BackendConfig,
    client: Client,
}

impl GenericOpenAiCompatibleAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> Result<HeaderMap, RouterError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // Unlike OpenAI proper, a lot of these deployments run with no
        // authentication at all — only set the header if a key is configured.
        if !self.config.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                    .map_err(|e| RouterError::Internal(format!("invalid api key: {e}")))?,
            );
        }
        for (key, value) in &self.config.additional_headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| RouterError::Internal(format!("invalid header name '{key}': {e}")))?;
            headers.insert(name, HeaderValue::from_str(value).map_err(|e| RouterError::Internal(format!("invalid header value: {e}")))?);
        }
        Ok(headers)
    }

    fn convert_request(&self, request: &ChatRequest) -> WireRequest {
        WireRequest {
            model: self.config.model_name.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_output_tokens),
            top_p: request.top_p.or(self.config.top_p),
            frequency_penalty: request.frequency_penalty.or(self.config.frequency_penalty),
            presence_penalty: request.presence_penalty.or(self.config.presence_penalty),
            stop: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
        }
    }
}

#[async_trait]
impl Adapter for GenericOpenAiCompatibleAdapter {
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
            warn!(backend = %self.config.name, status = %status, "generic openai-compatible request failed");
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
            .ok_or_else(|| RouterError::Deserialization("response had no choices".to_string()))?;

        debug!(backend = %self.config.name, "generic openai-compatible request succeeded");

        let model = if parsed.model.is_empty() { self.config.model_name.clone() } else { parsed.model };
        let mut response = Response::success(&self.config.name, model, choice.message.content)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_finish_reason(choice.finish_reason.unwrap_or_default());
        if let Some(usage) = parsed.usage {
            response = response.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(response)
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
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
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
