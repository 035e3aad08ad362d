//! Test doubles for exercising the `Service` without real network calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::Adapter;
use crate::error::{ErrorKind, RouterError};
use crate::request::ChatRequest;
use crate::response::Response;

/// One scripted outcome for a `FakeAdapter` call.
#[derive(Clone)]
pub enum Scripted {
    Success { text: String, latency: Duration },
    Failure { kind: ErrorKind, message: String, latency: Duration },
}

impl Scripted {
    pub fn success(text: impl Into<String>) -> Self {
        Scripted::Success { text: text.into(), latency: Duration::from_millis(0) }
    }

    pub fn success_after(text: impl Into<String>, latency: Duration) -> Self {
        Scripted::Success { text: text.into(), latency }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Scripted::Failure { kind, message: message.into(), latency: Duration::from_millis(0) }
    }
}

/// An [`Adapter`] driven entirely by a pre-scripted sequence of responses.
/// Each call to `chat` consumes the next scripted entry; once exhausted the
/// last entry repeats. Used by the service's integration tests to exercise
/// failover/circuit-breaker/budget paths deterministically.
pub struct FakeAdapter {
    name: String,
    script: Vec<Scripted>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<ChatRequest>>,
    available: std::sync::atomic::AtomicBool,
}

impl FakeAdapter {
    pub fn new(name: impl Into<String>, script: Vec<Scripted>) -> Self {
        Self {
            name: name.into(),
            script,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            available: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn always_succeeding(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, vec![Scripted::success(text)])
    }

    pub fn always_failing(name: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(name, vec![Scripted::failure(kind, message)])
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("fake adapter mutex poisoned").len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.calls.lock().expect("fake adapter mutex poisoned").clone()
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        self.calls.lock().expect("fake adapter mutex poisoned").push(request.clone());
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(self.script.len().saturating_sub(1));
        let outcome = self.script.get(idx).cloned().unwrap_or(Scripted::success(""));
        match outcome {
            Scripted::Success { text, latency } => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Ok(Response::success(&self.name, "fake-model", text))
            }
            Scripted::Failure { kind, message, latency } => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Err(match kind {
                    ErrorKind::Timeout => RouterError::Timeout,
                    ErrorKind::Network => RouterError::Network(message),
                    ErrorKind::RateLimit => RouterError::RateLimit(message),
                    ErrorKind::Auth => RouterError::Auth(message),
                    ErrorKind::BadRequest => RouterError::BadRequest(message),
                    ErrorKind::ServerError => RouterError::ServerError(message),
                    ErrorKind::Deserialization => RouterError::Deserialization(message),
                    ErrorKind::Cancelled => RouterError::Cancelled,
                    ErrorKind::Unsupported => RouterError::Unsupported(message),
                    _ => RouterError::Internal(message),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_adapter_replays_script_then_holds_last() {
        let fake = FakeAdapter::new(
            "fake",
            vec![Scripted::failure(ErrorKind::ServerError, "boom"), Scripted::success("ok")],
        );
        let req = ChatRequest::new(vec![crate::request::ChatMessage::user("hi")]);
        assert!(fake.chat(&req).await.is_err());
        assert!(fake.chat(&req).await.is_ok());
        assert!(fake.chat(&req).await.is_ok());
        assert_eq!(fake.call_count(), 3);
    }
}
