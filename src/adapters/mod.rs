//! Per-backend wire adapters.
//!
//! Each adapter translates the neutral [`ChatRequest`]/[`CompletionRequest`]
//! model into one backend's HTTP protocol and translates the reply back into
//! a neutral [`Response`]. The router never branches on backend type outside
//! this module — everywhere else only sees `dyn Adapter`.

pub mod anthropic;
pub mod azure;
pub mod cohere;
pub mod easynmt;
pub mod generic;
pub mod google;
pub mod llamacpp;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;

use crate::config::{BackendConfig, BackendType};
use crate::error::RouterError;
use crate::request::{ChatRequest, CompletionRequest};
use crate::response::Response;

/// Uniform interface every backend implementation presents to the router.
///
/// Streaming is an optional extension: the base contract is request/response.
/// Adapters that can't stream keep the default, which returns
/// `RouterError::Unsupported`.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider tag used in logs, metrics labels, and config matching.
    fn name(&self) -> &str;

    /// Cheap reachability probe, used by health checks. Not on the hot path
    /// for `complete`/`chat`.
    async fn is_available(&self) -> bool;

    async fn complete(&self, request: &CompletionRequest) -> Result<Response, RouterError> {
        self.chat(&request.clone().into_chat()).await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError>;

    /// Optional streaming extension. Adapters that support it override this;
    /// the default makes the unsupported case explicit instead of silently
    /// falling back to a buffered response.
    async fn chat_stream(
        &self,
        _request: &ChatRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, RouterError>>, RouterError> {
        Err(RouterError::Unsupported("streaming".to_string()))
    }
}

/// Build the built-in adapter for a backend configuration. Custom/plugin
/// backend types never reach this function — the [`crate::plugin::PluginRegistry`]
/// resolves those.
pub fn build_adapter(config: &BackendConfig, client: reqwest::Client) -> Result<Box<dyn Adapter>, RouterError> {
    match config.backend_type {
        BackendType::OpenAi => Ok(Box::new(openai::OpenAiAdapter::new(config.clone(), client))),
        BackendType::AzureOpenAi => Ok(Box::new(azure::AzureOpenAiAdapter::new(config.clone(), client))),
        BackendType::Anthropic => Ok(Box::new(anthropic::AnthropicAdapter::new(config.clone(), client))),
        BackendType::Google => Ok(Box::new(google::GoogleAdapter::new(config.clone(), client))),
        BackendType::Cohere => Ok(Box::new(cohere::CohereAdapter::new(config.clone(), client))),
        BackendType::Ollama | BackendType::LmStudio => {
            Ok(Box::new(ollama::OllamaAdapter::new(config.clone(), client)))
        }
        BackendType::EasyNmt => Ok(Box::new(easynmt::EasyNmtAdapter::new(config.clone(), client))),
        BackendType::LlamaCpp => Ok(Box::new(llamacpp::LlamaCppAdapter::new(config.clone(), client))),
        BackendType::GenericOpenAiCompatible => {
            Ok(Box::new(generic::GenericOpenAiCompatibleAdapter::new(config.clone(), client)))
        }
    }
}

/// Shared helper: map a non-2xx HTTP response into a `RouterError`, reading
/// the body for an error message where possible. Adapters call this rather
/// than each hand-rolling status interpretation.
pub(crate) async fn error_for_status(resp: reqwest::Response) -> RouterError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    RouterError::from_status(status, body)
}

/// Shared availability rule for probes that hit an ordinary request
/// endpoint rather than a dedicated health check (Azure's chat-completions
/// URL, Anthropic's `/v1/messages`): 2xx or a non-auth 4xx both mean the
/// backend is reachable and our credentials resolve, since a validation
/// error from a deliberately minimal/malformed probe still proves that much.
/// Only 401/403/5xx (and transport failure, handled by the caller) count as
/// unavailable.
pub(crate) fn status_implies_available(status: reqwest::StatusCode) -> bool {
    status.is_success() || (status.is_client_error() && status.as_u16() != 401 && status.as_u16() != 403)
}

/// Turn a `text/event-stream` response body into a stream of `data:` payload
/// strings, stripping the `[DONE]` sentinel. Hand-rolled rather than pulling
/// in a dedicated SSE crate — each provider's delta shape still needs
/// per-adapter parsing, so this only handles the framing.
pub(crate) fn sse_data_stream(
    resp: reqwest::Response,
) -> futures::stream::BoxStream<'static, Result<String, RouterError>> {
    use futures::StreamExt;

    let bytes_stream = resp.bytes_stream();
    let events = futures::stream::unfold((bytes_stream, String::new()), |(mut stream, mut buffer)| async move {
        loop {
            if let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                    let data = data.trim();
                    if data == "[DONE]" || data.is_empty() {
                        continue;
                    }
                    return Some((Ok(data.to_string()), (stream, buffer)));
                }
                continue;
            }
            match stream.next().await {
                Some(Ok(chunk)) => {
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(e)) => return Some((Err(RouterError::Network(e.to_string())), (stream, buffer))),
                None => {
                    let remainder = buffer.trim().to_string();
                    if let Some(data) = remainder.strip_prefix("data: ").or_else(|| remainder.strip_prefix("data:")) {
                        if !data.trim().is_empty() && data.trim() != "[DONE]" {
                            return Some((Ok(data.trim().to_string()), (stream, String::new())));
                        }
                    }
                    return None;
                }
            }
        }
    });
    events.boxed()
}

/// Turn a newline-delimited-JSON response body (Ollama's streaming shape)
/// into a stream of raw JSON line strings.
pub(crate) fn ndjson_stream(
    resp: reqwest::Response,
) -> futures::stream::BoxStream<'static, Result<String, RouterError>> {
    use futures::StreamExt;

    let bytes_stream = resp.bytes_stream();
    let lines = futures::stream::unfold((bytes_stream, String::new()), |(mut stream, mut buffer)| async move {
        loop {
            if let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                return Some((Ok(line), (stream, buffer)));
            }
            match stream.next().await {
                Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(e)) => return Some((Err(RouterError::Network(e.to_string())), (stream, buffer))),
                None => {
                    let remainder = buffer.trim().to_string();
                    if remainder.is_empty() {
                        return None;
                    }
                    return Some((Ok(remainder), (stream, String::new())));
                }
            }
        }
    });
    lines.boxed()
}
