//! Ollama adapter. Also used for LM Studio backends — both speak an
//! OpenAI-compatible `/v1/chat/completions` surface plus Ollama's own
//! `/api/tags` for a cheap availability probe; LM Studio implements the
//! same probe endpoint for compatibility.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, Role};
use crate::response::Response;

use super::Adapter;

pub struct OllamaAdapter {
    config: BackendConfig,
    client: Client,
}

impl OllamaAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
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
            model: self.config.model_name.clone(),
            messages,
            stream: false,
            options: WireOptions {
                temperature: request.temperature.or(self.config.temperature),
                top_p: request.top_p.or(self.config.top_p),
                num_predict: request.max_tokens.or(self.config.max_output_tokens),
                stop: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            },
        }
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.base_url.trim_end_matches('/')))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let body = self.convert_request(request);
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        let start = Instant::now();
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "ollama request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        debug!(backend = %self.config.name, "ollama request succeeded");

        let mut response = Response::success(&self.config.name, &self.config.model_name, parsed.message.content)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_finish_reason(if parsed.done { "stop" } else { "length" });
        if let (Some(prompt_tokens), Some(completion_tokens)) = (parsed.prompt_eval_count, parsed.eval_count) {
            response = response.with_usage(prompt_tokens, completion_tokens);
        }
        Ok(response)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, RouterError>>, RouterError> {
        use futures::StreamExt;

        let mut body = self.convert_request(request);
        body.stream = true;
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }

        let deltas = super::ndjson_stream(resp).map(|line| {
            let line = line?;
            let chunk: WireResponse = serde_json::from_str(&line).map_err(|e| RouterError::Deserialization(e.to_string()))?;
            Ok(chunk.message.content)
        });
        Ok(deltas.boxed())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: WireOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    message: WireMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}
