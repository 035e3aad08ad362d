//! Cohere Chat API adapter.
//!
//! Cohere's chat endpoint separates the latest user turn (`message`) from
//! the rest of the conversation (`chat_history`), and uses `CHATBOT` rather
//! than `assistant` for prior model turns.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, CompletionRequest, Role};
use crate::response::Response;

use super::Adapter;

pub struct CohereAdapter {
    config: BackendConfig,
    client: Client,
}

impl CohereAdapter {
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
        Ok(headers)
    }

    fn convert_request(&self, request: &ChatRequest) -> Result<WireRequest, RouterError> {
        let message = request
            .last_user_message()
            .ok_or_else(|| RouterError::BadRequest("cohere requires at least one user message".to_string()))?
            .content
            .clone();

        let last_user_index = request.messages.iter().rposition(|m| m.role == Role::User);
        let history = request
            .messages
            .iter()
            .enumerate()
            .filter(|(i, m)| m.role != Role::System && Some(*i) != last_user_index)
            .map(|(_, m)| WireHistoryEntry {
                role: match m.role {
                    Role::User => "USER",
                    Role::Assistant => "CHATBOT",
                    Role::System => unreachable!("system filtered above"),
                }
                .to_string(),
                message: m.content.clone(),
            })
            .collect();

        Ok(WireRequest {
            model: self.config.model_name.clone(),
            message,
            chat_history: history,
            preamble: request.system_message().map(|m| m.content.clone()),
            temperature: request.temperature.or(self.config.temperature),
            p: request.top_p.or(self.config.top_p),
            max_tokens: request.max_tokens.or(self.config.max_output_tokens),
            stop_sequences: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
        })
    }

    fn convert_completion(&self, request: &CompletionRequest) -> GenerateRequest {
        GenerateRequest {
            model: self.config.model_name.clone(),
            prompt: request.prompt.clone(),
            temperature: request.temperature.or(self.config.temperature),
            p: request.top_p.or(self.config.top_p),
            max_tokens: request.max_tokens.or(self.config.max_output_tokens),
            stop_sequences: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
        }
    }
}

#[async_trait]
impl Adapter for CohereAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Response, RouterError> {
        let headers = self.build_headers()?;
        let body = self.convert_completion(request);
        let url = format!("{}/v1/generate", self.config.base_url.trim_end_matches('/'));

        let start = Instant::now();
        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "cohere generate failed");
            return Err(err);
        }

        let parsed: GenerateResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();
        let generation = parsed
            .generations
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Deserialization("cohere generate response had no generations".to_string()))?;

        debug!(backend = %self.config.name, "cohere generate succeeded");

        let mut response = Response::success(&self.config.name, &self.config.model_name, generation.text)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_finish_reason(generation.finish_reason.unwrap_or_default());
        if let Some(meta) = parsed.meta.and_then(|m| m.billed_units) {
            response = response.with_usage(meta.input_tokens.unwrap_or(0), meta.output_tokens.unwrap_or(0));
        }
        Ok(response)
    }

    async fn is_available(&self) -> bool {
        let headers = match self.build_headers() {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.client
            .get(format!("{}/v1/models/{}", self.config.base_url.trim_end_matches('/'), self.config.model_name))
            .headers(headers)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let headers = self.build_headers()?;
        let body = self.convert_request(request)?;
        let url = format!("{}/v1/chat", self.config.base_url.trim_end_matches('/'));

        let start = Instant::now();
        let resp = self.client.post(&url).headers(headers).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "cohere request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        debug!(backend = %self.config.name, "cohere request succeeded");

        let mut response = Response::success(&self.config.name, &self.config.model_name, parsed.text)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_finish_reason(parsed.finish_reason.unwrap_or_default());
        if let Some(meta) = parsed.meta.and_then(|m| m.billed_units) {
            response = response.with_usage(meta.input_tokens.unwrap_or(0), meta.output_tokens.unwrap_or(0));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    message: String,
    chat_history: Vec<WireHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireHistoryEntry {
    role: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    text: String,
    finish_reason: Option<String>,
    meta: Option<WireMeta>,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    billed_units: Option<BilledUnits>,
}

#[derive(Debug, Deserialize)]
struct BilledUnits {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generations: Vec<Generation>,
    meta: Option<WireMeta>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    text: String,
    finish_reason: Option<String>,
}
