//! Google Gemini adapter (AI Studio `generativelanguage.googleapis.com`
//! endpoint; Vertex AI deployments work the same way with `base_url`/
//! `project_id`/`location` pointed at the regional endpoint).
//!
//! System messages fold into the top-level `systemInstruction` field rather
//! than being merged into the first user turn — Gemini has supported this
//! natively since `v1beta`, and folding into the first turn would corrupt a
//! conversation that starts with an assistant-authored message.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, Role};
use crate::response::Response;

use super::Adapter;

pub struct GoogleAdapter {
    config: BackendConfig,
    client: Client,
}

impl GoogleAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// AI Studio deployments authenticate with `?key=` on the URL; Vertex AI
    /// deployments (selected by setting `project_id`/`location`) instead use
    /// a project/location-scoped path and a bearer token.
    fn is_vertex(&self) -> bool {
        self.config.project_id.is_some() && self.config.location.is_some()
    }

    fn endpoint(&self, action: &str) -> String {
        if let (Some(project_id), Some(location)) = (&self.config.project_id, &self.config.location) {
            format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
                self.config.base_url.trim_end_matches('/'),
                project_id,
                location,
                self.config.model_name,
                action,
            )
        } else {
            format!(
                "{}/v1beta/models/{}:{}?key={}",
                self.config.base_url.trim_end_matches('/'),
                self.config.model_name,
                action,
                self.config.api_key
            )
        }
    }

    fn bearer_header(&self) -> Result<Option<(reqwest::header::HeaderName, HeaderValue)>, RouterError> {
        if !self.is_vertex() {
            return Ok(None);
        }
        let value = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RouterError::Internal(format!("invalid api key: {e}")))?;
        Ok(Some((AUTHORIZATION, value)))
    }

    fn convert_request(&self, request: &ChatRequest) -> WireRequest {
        let system_instruction = request.system_message().map(|m| SystemInstruction {
            parts: vec![Part { text: m.content.clone() }],
        });

        let contents = request
            .non_system_messages()
            .map(|m| WireContent {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => unreachable!("filtered by non_system_messages"),
                }
                .to_string(),
                parts: vec![Part { text: m.content.clone() }],
            })
            .collect();

        WireRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature.or(self.config.temperature),
                top_p: request.top_p.or(self.config.top_p),
                max_output_tokens: request.max_tokens.or(self.config.max_output_tokens),
                stop_sequences: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            },
        }
    }
}

#[async_trait]
impl Adapter for GoogleAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        let url = if self.is_vertex() {
            format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{}",
                self.config.base_url.trim_end_matches('/'),
                self.config.project_id.as_deref().unwrap_or_default(),
                self.config.location.as_deref().unwrap_or_default(),
                self.config.model_name,
            )
        } else {
            format!(
                "{}/v1beta/models/{}?key={}",
                self.config.base_url.trim_end_matches('/'),
                self.config.model_name,
                self.config.api_key
            )
        };
        let mut req = self.client.get(url);
        if let Ok(Some((name, value))) = self.bearer_header() {
            req = req.header(name, value);
        }
        req.send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let body = self.convert_request(request);
        let url = self.endpoint("generateContent");

        let start = Instant::now();
        let mut req = self.client.post(&url).json(&body);
        if let Some((name, value)) = self.bearer_header()? {
            req = req.header(name, value);
        }
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "gemini request failed");
            return Err(err);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Deserialization("gemini response had no candidates".to_string()))?;
        let text = candidate.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");

        debug!(backend = %self.config.name, "gemini request succeeded");

        let mut response = Response::success(&self.config.name, &self.config.model_name, text)
            .with_duration_ms(elapsed.as_millis() as u64)
            .with_finish_reason(candidate.finish_reason.unwrap_or_default());
        if let Some(usage) = parsed.usage_metadata {
            response = response.with_usage(usage.prompt_token_count, usage.candidates_token_count);
        }
        Ok(response)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, RouterError>>, RouterError> {
        use futures::StreamExt;

        let body = self.convert_request(request);
        let base = self.endpoint("streamGenerateContent");
        let separator = if base.contains('?') { '&' } else { '?' };
        let url = format!("{base}{separator}alt=sse");

        let mut req = self.client.post(&url).json(&body);
        if let Some((name, value)) = self.bearer_header()? {
            req = req.header(name, value);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }

        let deltas = super::sse_data_stream(resp).map(|event| {
            let data = event?;
            let chunk: StreamChunk = serde_json::from_str(&data).map_err(|e| RouterError::Deserialization(e.to_string()))?;
            let text = chunk
                .candidates
                .into_iter()
                .next()
                .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
                .unwrap_or_default();
            Ok(text)
        });
        Ok(deltas.boxed())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopSequences")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: WireContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    candidates: Vec<StreamCandidate>,
}

#[derive(Debug, Deserialize)]
struct StreamCandidate {
    content: WireContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::request::ChatMessage;

    fn adapter() -> GoogleAdapter {
        let config = BackendConfig::new("gemini", BackendType::Google, "https://generativelanguage.googleapis.com", "gemini-1.5-pro");
        GoogleAdapter::new(config, Client::new())
    }

    #[test]
    fn system_message_becomes_system_instruction_not_first_turn() {
        let adapter = adapter();
        let req = ChatRequest::new(vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]);
        let wire = adapter.convert_request(&req);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 1);
        assert_eq!(wire.contents[0].role, "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let adapter = adapter();
        let req = ChatRequest::new(vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]);
        let wire = adapter.convert_request(&req);
        assert_eq!(wire.contents[1].role, "model");
    }

    #[test]
    fn vertex_config_builds_project_scoped_endpoint() {
        let mut config = BackendConfig::new("gemini-vertex", BackendType::Google, "https://us-central1-aiplatform.googleapis.com", "gemini-1.5-pro");
        config.project_id = Some("my-project".to_string());
        config.location = Some("us-central1".to_string());
        let adapter = GoogleAdapter::new(config, Client::new());
        let url = adapter.endpoint("generateContent");
        assert!(url.contains("/v1/projects/my-project/locations/us-central1/publishers/google/models/gemini-1.5-pro:generateContent"));
        assert!(!url.contains("?key="));
    }

    #[test]
    fn ai_studio_config_uses_query_string_key() {
        let adapter = adapter();
        let url = adapter.endpoint("generateContent");
        assert!(url.contains("?key="));
    }

    #[test]
    fn stream_chunk_extracts_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hi"}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.candidates[0].content.parts[0].text, "hi");
    }
}
