//! The uniform response shape every adapter and the Service return.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Response returned by `Service::complete` / `Service::chat`, and by each
/// individual adapter call before the Service aggregates across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echoes the originating request's id, for caller-side log correlation
    /// across retries and backends.
    pub request_id: Option<Uuid>,
    pub success: bool,
    pub text: String,
    pub backend: String,
    pub model: String,
    pub duration_ms: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub finish_reason: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Populated only by the Simultaneous strategy; never contains the
    /// primary response.
    #[serde(default)]
    pub alternative_responses: Vec<Response>,
}

impl Response {
    pub fn success(backend: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            request_id: None,
            success: true,
            text: text.into(),
            backend: backend.into(),
            model: model.into(),
            duration_ms: 0,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            finish_reason: None,
            error_message: None,
            error_kind: None,
            alternative_responses: Vec::new(),
        }
    }

    pub fn failure(backend: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            success: false,
            text: String::new(),
            backend: backend.into(),
            model: String::new(),
            duration_ms: 0,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            finish_reason: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            alternative_responses: Vec::new(),
        }
    }

    /// A failure response with no backend contacted at all (e.g. `NoBackend`).
    pub fn failure_uncontacted(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::failure("", kind, message)
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.prompt_tokens = Some(prompt_tokens);
        self.completion_tokens = Some(completion_tokens);
        self.total_tokens = Some(prompt_tokens + completion_tokens);
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tokens_is_sum() {
        let r = Response::success("b", "m", "hi").with_usage(3, 1);
        assert_eq!(r.total_tokens, Some(4));
    }

    #[test]
    fn failure_has_no_text() {
        let r = Response::failure("b", ErrorKind::ServerError, "boom");
        assert!(!r.success);
        assert_eq!(r.text, "");
        assert_eq!(r.error_kind, Some(ErrorKind::ServerError));
    }
}
