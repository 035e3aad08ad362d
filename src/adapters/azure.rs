//! Azure OpenAI adapter.
//!
//! Shares OpenAI's wire payload shape but addresses a deployment rather than
//! a model, authenticates with `api-key` instead of `Authorization: Bearer`,
//! and requires an `api-version` query parameter.

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

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

pub struct AzureOpenAiAdapter {
    config: BackendConfig,
    client: Client,
}

impl AzureOpenAiAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> Result<HeaderMap, RouterError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| RouterError::Internal(format!("invalid api key: {e}")))?,
        );
        Ok(headers)
    }

    fn deployment_url(&self, path: &str) -> Result<String, RouterError> {
        let deployment = self
            .config
            .deployment_name
            .as_ref()
            .ok_or_else(|| RouterError::BadRequest("azure backend missing deployment_name".to_string()))?;
        let version = self.config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);
        Ok(format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.config.base_url.trim_end_matches('/'),
            deployment,
            path,
            version
        ))
    }

    fn convert_request(&self, request: &ChatRequest) -> WireRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();
        WireRequest {
            messages,
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
impl Adapter for AzureOpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        let (headers, url) = match (self.build_headers(), self.deployment_url("chat/completions")) {
            (Ok(h), Ok(u)) => (h, u),
            _ => return false,
        };
        // A bare GET against the chat completions URL has no dedicated health
        // endpoint to answer it, so any 2xx or non-auth 4xx (it'll most
        // likely come back 405) still proves the deployment and credentials
        // resolve; 401/403/5xx/transport errors mean it doesn't.
        match self.client.get(&url).headers(headers).send().await {
            Ok(r) => super::status_implies_available(r.status()),
            Err(_) => false,
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let headers = self.build_headers()?;
        let url = self.deployment_url("chat/completions")?;
        let body = self.convert_request(request);

        let start = Instant::now();
        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "azure openai request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Deserialization("azure openai response had no choices".to_string()))?;

        debug!(backend = %self.config.name, "azure openai request succeeded");

        Ok(Response::success(&self.config.name, &self.config.model_name, choice.message.content)
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
        let url = self.deployment_url("chat/completions")?;
        let mut body = self.convert_request(request);
        body.stream = true;

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

#[derive(Debug, Deserialize)]
struct WireResponse {
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
