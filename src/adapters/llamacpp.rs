//! llama.cpp server adapter.
//!
//! Talks to a running `llama.cpp` server over its native `/completion`
//! endpoint for `complete()` and its OpenAI-compatible `/v1/chat/completions`
//! endpoint for `chat()`. If `model_path` is configured and the file isn't
//! present on disk, and `auto_download_model` is set, the model is fetched
//! from `model_url` before the first request — downloads are serialized per
//! path so two backends (or two concurrent requests against a cold backend)
//! never race on the same file.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::{ChatRequest, CompletionRequest, Role};
use crate::response::Response;

use super::Adapter;

/// How often to log download progress, at minimum.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// One lock per model path, shared across every `LlamaCppAdapter` instance in
/// the process — two backends pointed at the same `model_path` still only
/// download it once.
fn download_locks() -> &'static DashMap<String, Arc<AsyncMutex<()>>> {
    static LOCKS: OnceLock<DashMap<String, Arc<AsyncMutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

fn download_lock_for(path: &str) -> Arc<AsyncMutex<()>> {
    download_locks().entry(path.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

pub struct LlamaCppAdapter {
    config: BackendConfig,
    client: Client,
}

impl LlamaCppAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Ensures the configured model file exists locally, downloading it first
    /// if `auto_download_model` is set and the file is missing. A no-op when
    /// `model_path` isn't configured (the server already has a model loaded).
    async fn ensure_model_ready(&self) -> Result<(), RouterError> {
        let Some(path) = self.config.model_path.as_ref() else {
            return Ok(());
        };
        if Path::new(path).exists() {
            return Ok(());
        }
        if !self.config.auto_download_model {
            return Err(RouterError::BadRequest(format!(
                "model file '{path}' does not exist and auto_download_model is disabled"
            )));
        }
        let url = self.config.model_url.clone().ok_or_else(|| {
            RouterError::BadRequest("auto_download_model is enabled but model_url is not set".to_string())
        })?;

        let lock = download_lock_for(path);
        let _guard = lock.lock().await;
        // Re-check after acquiring the lock: another task may have already
        // finished the download while we were waiting.
        if Path::new(path).exists() {
            return Ok(());
        }

        info!(backend = %self.config.name, model_path = %path, model_url = %url, "downloading llama.cpp model");
        self.download_model(&url, Path::new(path)).await?;
        info!(backend = %self.config.name, model_path = %path, "model download complete");
        Ok(())
    }

    async fn download_model(&self, url: &str, dest: &Path) -> Result<(), RouterError> {
        let dir = dest.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let file_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("model");

        let staging = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| RouterError::Internal(format!("failed to create staging file for model download: {e}")))?;

        let std_file = staging
            .reopen()
            .map_err(|e| RouterError::Internal(format!("failed to reopen staging file: {e}")))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }
        let total_bytes = resp.content_length();

        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_logged = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RouterError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RouterError::Internal(format!("failed writing model download to disk: {e}")))?;
            downloaded += chunk.len() as u64;

            if last_logged.elapsed() >= PROGRESS_LOG_INTERVAL {
                info!(
                    backend = %self.config.name,
                    downloaded_bytes = downloaded,
                    total_bytes = total_bytes,
                    "model download in progress"
                );
                last_logged = Instant::now();
            }
        }

        file.sync_all().await.map_err(|e| RouterError::Internal(format!("fsync failed for model download: {e}")))?;
        drop(file);

        // `persist` performs the atomic rename; on any error the `NamedTempFile`
        // is dropped and unlinks the partial file automatically.
        staging
            .persist(dest)
            .map_err(|e| RouterError::Internal(format!("failed to finalize downloaded model file: {e}")))?;
        Ok(())
    }

    fn native_params(&self) -> NativeParams {
        NativeParams {
            n_ctx: self.config.context_size,
            n_gpu_layers: self.config.gpu_layers,
            n_threads: self.config.threads,
            use_mlock: if self.config.use_memory_lock { Some(true) } else { None },
            seed: self.config.seed,
        }
    }

    fn convert_completion_request(&self, request: &CompletionRequest) -> NativeCompletionRequest {
        NativeCompletionRequest {
            prompt: request.prompt.clone(),
            temperature: request.temperature.or(self.config.temperature),
            n_predict: request.max_tokens.or(self.config.max_output_tokens).map(|v| v as i64),
            top_p: request.top_p.or(self.config.top_p),
            frequency_penalty: request.frequency_penalty.or(self.config.frequency_penalty),
            presence_penalty: request.presence_penalty.or(self.config.presence_penalty),
            stop: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
            params: self.native_params(),
        }
    }

    fn convert_chat_request(&self, request: &ChatRequest) -> ChatWireRequest {
        ChatWireRequest {
            model: self.config.model_name.clone(),
            messages: request.messages.iter().map(ChatWireMessage::from).collect(),
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_output_tokens),
            top_p: request.top_p.or(self.config.top_p),
            stop: request.stop_sequences.clone().or_else(|| self.config.stop_sequences.clone()),
            stream: false,
        }
    }
}

#[async_trait]
impl Adapter for LlamaCppAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        if let Ok(resp) = self.client.get(format!("{}/health", self.base_url())).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        self.client
            .get(format!("{}/v1/models", self.base_url()))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Response, RouterError> {
        self.ensure_model_ready().await?;

        let body = self.convert_completion_request(request);
        let url = format!("{}/completion", self.base_url());

        let start = Instant::now();
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "llama.cpp native completion failed");
            return Err(err);
        }

        let parsed: NativeCompletionResponse =
            resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        debug!(backend = %self.config.name, "llama.cpp native completion succeeded");

        let mut response = Response::success(&self.config.name, &self.config.model_name, parsed.content)
            .with_duration_ms(elapsed.as_millis() as u64);
        if let Some(stop_type) = parsed.stopped_reason() {
            response = response.with_finish_reason(stop_type);
        }
        if let (Some(prompt_n), Some(predicted_n)) = (parsed.tokens_evaluated, parsed.tokens_predicted) {
            response = response.with_usage(prompt_n, predicted_n);
        }
        Ok(response)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        self.ensure_model_ready().await?;

        let body = self.convert_chat_request(request);
        let url = format!("{}/v1/chat/completions", self.base_url());

        let start = Instant::now();
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let err = super::error_for_status(resp).await;
            warn!(backend = %self.config.name, status = %status, "llama.cpp chat completion failed");
            return Err(err);
        }

        let parsed: ChatWireResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        let elapsed = start.elapsed();

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Deserialization("llama.cpp response had no choices".to_string()))?;

        debug!(backend = %self.config.name, "llama.cpp chat completion succeeded");

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
struct NativeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    n_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_gpu_layers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_mlock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Serialize)]
struct NativeCompletionRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
    #[serde(flatten)]
    params: NativeParams,
}

#[derive(Debug, Deserialize)]
struct NativeCompletionResponse {
    content: String,
    stop: Option<bool>,
    truncated: Option<bool>,
    tokens_evaluated: Option<u32>,
    tokens_predicted: Option<u32>,
}

impl NativeCompletionResponse {
    fn stopped_reason(&self) -> Option<&'static str> {
        if self.truncated == Some(true) {
            Some("length")
        } else if self.stop == Some(true) {
            Some("stop")
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatWireRequest {
    model: String,
    messages: Vec<ChatWireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatWireMessage {
    role: String,
    content: String,
}

impl From<&crate::request::ChatMessage> for ChatWireMessage {
    fn from(m: &crate::request::ChatMessage) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        ChatWireMessage { role: role.to_string(), content: m.content.clone() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatWireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatWireChoice>,
    usage: Option<ChatWireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatWireChoice {
    message: ChatWireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatWireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::request::ChatMessage;

    fn config() -> BackendConfig {
        BackendConfig::new("local-llama", BackendType::LlamaCpp, "http://localhost:8080", "llama-3-8b-instruct")
    }

    #[test]
    fn convert_completion_request_maps_max_tokens_to_n_predict() {
        let adapter = LlamaCppAdapter::new(config(), Client::new());
        let mut req = CompletionRequest::new("hello there");
        req.max_tokens = Some(128);
        let wire = adapter.convert_completion_request(&req);
        assert_eq!(wire.n_predict, Some(128));
        assert_eq!(wire.prompt, "hello there");
    }

    #[test]
    fn native_params_forward_context_and_gpu_settings() {
        let mut cfg = config();
        cfg.context_size = Some(4096);
        cfg.gpu_layers = Some(32);
        cfg.use_memory_lock = true;
        let adapter = LlamaCppAdapter::new(cfg, Client::new());
        let params = adapter.native_params();
        assert_eq!(params.n_ctx, Some(4096));
        assert_eq!(params.n_gpu_layers, Some(32));
        assert_eq!(params.use_mlock, Some(true));
    }

    #[tokio::test]
    async fn missing_model_without_auto_download_is_bad_request() {
        let mut cfg = config();
        cfg.model_path = Some("/nonexistent/path/to/model.gguf".to_string());
        cfg.auto_download_model = false;
        let adapter = LlamaCppAdapter::new(cfg, Client::new());
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let err = adapter.chat(&req).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn auto_download_without_model_url_is_bad_request() {
        let mut cfg = config();
        cfg.model_path = Some("/nonexistent/path/to/model.gguf".to_string());
        cfg.auto_download_model = true;
        let adapter = LlamaCppAdapter::new(cfg, Client::new());
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let err = adapter.chat(&req).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }

    #[test]
    fn chat_wire_message_maps_roles() {
        let msg = ChatWireMessage::from(&ChatMessage::assistant("hi"));
        assert_eq!(msg.role, "assistant");
    }
}
