//! The Service: the router's public entry point.
//!
//! Owns the configured backends, the selection strategy, the process-wide
//! rate limiter, and the metrics sink, and implements the dispatch algorithm:
//! pick an ordering via [`crate::selector`], try each candidate with
//! per-backend retry/backoff, and either return the first success (ordered
//! strategies) or fan out and aggregate (`Simultaneous`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use tracing::warn;

use crate::adapters::{self, Adapter};
use crate::backend::circuit::CircuitBreaker;
use crate::backend::health::BackendHealth;
use crate::backend::BackendInstance;
use crate::config::{BackendConfig, RootConfig, SelectionStrategy};
use crate::error::{ErrorKind, RouterError};
use crate::metrics::MetricsSink;
use crate::plugin::PluginRegistry;
use crate::ratelimit::RateLimiter;
use crate::request::{ChatRequest, CompletionRequest};
use crate::response::Response;
use crate::selector::{self, RoundRobinCursor};

/// Per-backend counters, returned by [`Service::get_statistics`]. Identical
/// shape to [`BackendHealth`] — a separate alias rather than a separate
/// struct since there's nothing a statistics snapshot needs that a health
/// snapshot doesn't already carry.
pub type BackendStats = BackendHealth;

pub struct Service {
    settings: RootConfig,
    backends: Vec<BackendInstance>,
    round_robin: RoundRobinCursor,
    rate_limiter: RateLimiter,
    metrics: MetricsSink,
}

/// Either request shape the Service dispatches, bundled so the retry/selector
/// machinery below doesn't need to be written twice.
enum RequestKind {
    Complete(CompletionRequest),
    Chat(ChatRequest),
}

impl RequestKind {
    async fn invoke(&self, adapter: &dyn Adapter) -> Result<Response, RouterError> {
        match self {
            RequestKind::Complete(r) => adapter.complete(r).await,
            RequestKind::Chat(r) => adapter.chat(r).await,
        }
    }

    fn preferred_backend(&self) -> Option<&str> {
        match self {
            RequestKind::Complete(r) => r.preferred_backend.as_deref(),
            RequestKind::Chat(r) => r.preferred_backend.as_deref(),
        }
    }

    fn id(&self) -> uuid::Uuid {
        match self {
            RequestKind::Complete(r) => r.id,
            RequestKind::Chat(r) => r.id,
        }
    }

    /// Apply root-level defaults (`default_temperature`, `default_max_tokens`)
    /// only where neither the request nor the chosen backend's own config
    /// already supplies a value — request > backend config > global default.
    fn with_defaults(&self, backend_config: &BackendConfig, settings: &RootConfig) -> RequestKind {
        match self {
            RequestKind::Complete(r) => {
                let mut r = r.clone();
                if r.temperature.is_none() && backend_config.temperature.is_none() {
                    r.temperature = Some(settings.default_temperature);
                }
                if r.max_tokens.is_none() && backend_config.max_output_tokens.is_none() {
                    r.max_tokens = Some(settings.default_max_tokens);
                }
                RequestKind::Complete(r)
            }
            RequestKind::Chat(r) => {
                let mut r = r.clone();
                if r.temperature.is_none() && backend_config.temperature.is_none() {
                    r.temperature = Some(settings.default_temperature);
                }
                if r.max_tokens.is_none() && backend_config.max_output_tokens.is_none() {
                    r.max_tokens = Some(settings.default_max_tokens);
                }
                RequestKind::Chat(r)
            }
        }
    }
}

impl Service {
    /// Build a Service from configuration, constructing one HTTP client and
    /// adapter per configured backend. Backends naming a `custom_backend_type`
    /// are resolved through `plugins`; everything else goes through the
    /// built-in [`adapters::build_adapter`].
    pub fn new(settings: RootConfig, plugins: &PluginRegistry) -> Result<Self, RouterError> {
        let mut names = std::collections::HashSet::new();
        for cfg in &settings.backends {
            if !names.insert(cfg.name.clone()) {
                return Err(RouterError::BadRequest(format!("duplicate backend name '{}'", cfg.name)));
            }
        }

        let mut backends = Vec::with_capacity(settings.backends.len());
        for cfg in &settings.backends {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.effective_timeout_seconds(settings.timeout_seconds)))
                .build()
                .map_err(|e| RouterError::Internal(format!("failed to build http client for backend '{}': {e}", cfg.name)))?;

            let adapter: Box<dyn Adapter> = match &cfg.custom_backend_type {
                Some(tag) => plugins.build(tag, cfg, client)?,
                None => adapters::build_adapter(cfg, client)?,
            };

            let circuit = CircuitBreaker::new(settings.circuit_breaker.clone());
            backends.push(BackendInstance::new(cfg.clone(), adapter, circuit));
        }

        Ok(Self::with_backends(settings, backends))
    }

    /// Construct directly from already-built backend instances, bypassing
    /// adapter/plugin resolution. Mainly useful for tests and embedders that
    /// build their own `BackendInstance`s (e.g. wrapping a [`crate::testing::FakeAdapter`]).
    pub fn with_backends(settings: RootConfig, backends: Vec<BackendInstance>) -> Self {
        let rate_limiter = RateLimiter::new(&settings.rate_limit);
        Self { settings, backends, round_robin: RoundRobinCursor::new(), rate_limiter, metrics: MetricsSink::new() }
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    pub async fn complete(&self, request: CompletionRequest) -> Response {
        if let Err(message) = request.validate() {
            return Response::failure_uncontacted(ErrorKind::BadRequest, message);
        }
        self.execute(RequestKind::Complete(request)).await
    }

    pub async fn chat(&self, request: ChatRequest) -> Response {
        if let Err(message) = request.validate() {
            return Response::failure_uncontacted(ErrorKind::BadRequest, message);
        }
        self.execute(RequestKind::Chat(request)).await
    }

    /// Names of every enabled, currently dispatchable backend, sorted
    /// lexicographically.
    pub fn available_backends(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.backends.iter().filter(|b| b.can_dispatch()).map(|b| b.name().to_string()).collect();
        names.sort();
        names
    }

    /// Look up a configured backend by name, case-insensitively.
    pub fn get_backend(&self, name: &str) -> Option<&BackendInstance> {
        self.backends.iter().find(|b| b.name().eq_ignore_ascii_case(name))
    }

    /// Live-probe every configured backend's reachability via
    /// `Adapter::is_available`, without mutating any accounting state.
    pub async fn test_backends(&self) -> HashMap<String, BackendHealth> {
        let probes = self.backends.iter().map(|backend| async move {
            let reachable = backend.adapter.is_available().await;
            let mut health = backend.snapshot_health();
            health.is_healthy = reachable;
            (backend.name().to_string(), health)
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Snapshot of accumulated counters for every configured backend, with no
    /// network calls.
    pub fn get_statistics(&self) -> HashMap<String, BackendStats> {
        self.backends.iter().map(|b| (b.name().to_string(), b.snapshot_health())).collect()
    }

    fn candidates(&self) -> Vec<(usize, &BackendInstance)> {
        self.backends.iter().enumerate().filter(|(_, b)| b.can_dispatch()).collect()
    }

    async fn execute(&self, kind: RequestKind) -> Response {
        let request_id = kind.id();
        let candidates = self.candidates();
        let plan = selector::select(self.settings.selection_strategy, &candidates, kind.preferred_backend(), &self.round_robin);

        if plan.order.is_empty() {
            return Response::failure_uncontacted(ErrorKind::NoBackend, "no backend available for this request")
                .with_request_id(request_id);
        }

        if plan.fan_out {
            return self.execute_simultaneous(&kind, &plan.order).await.with_request_id(request_id);
        }

        // Only `Failover` falls through to the next candidate on failure —
        // every other strategy tries exactly the head of its ordering and
        // returns whatever that attempt produced.
        for &idx in &plan.order {
            let backend = &self.backends[idx];
            let response = self.execute_with_retries(backend, &kind).await;
            if response.success || self.settings.selection_strategy != SelectionStrategy::Failover {
                return response.with_request_id(request_id);
            }
        }

        Response::failure_uncontacted(ErrorKind::NoBackend, "all backends failed").with_request_id(request_id)
    }

    async fn execute_simultaneous(&self, kind: &RequestKind, order: &[usize]) -> Response {
        let attempts = order.iter().map(|&idx| {
            let backend = &self.backends[idx];
            async move { self.execute_with_retries(backend, kind).await }
        });
        let mut results: Vec<Response> = join_all(attempts).await;
        let request_id = kind.id();
        for r in &mut results {
            r.request_id = Some(request_id);
        }

        match results.iter().position(|r| r.success) {
            Some(pos) => {
                let primary = results.remove(pos);
                Response { alternative_responses: results, ..primary }
            }
            None => Response { alternative_responses: results, ..Response::failure_uncontacted(ErrorKind::Unknown, "all backends failed") },
        }
    }

    async fn execute_with_retries(&self, backend: &BackendInstance, kind: &RequestKind) -> Response {
        let max_retries = backend.config.effective_max_retries(self.settings.max_retries);
        let mut last = None;

        for attempt in 1..=(max_retries + 1) {
            let response = self.execute_once(backend, kind).await;
            if response.success {
                return response;
            }
            let retryable = response.error_kind.map(ErrorKind::is_retryable).unwrap_or(false);
            let error_kind = response.error_kind;
            last = Some(response);
            if !retryable || attempt == max_retries + 1 {
                break;
            }
            tokio::time::sleep(backoff_delay(attempt, self.settings.retry_delay_ms, self.settings.use_exponential_backoff, error_kind)).await;
        }

        last.unwrap_or_else(|| Response::failure(backend.name(), ErrorKind::Unknown, "no attempt was made"))
    }

    /// A single dispatch attempt: pre-dispatch gate, rate limiter, the actual
    /// adapter call, then bookkeeping (circuit breaker, spend, metrics).
    async fn execute_once(&self, backend: &BackendInstance, kind: &RequestKind) -> Response {
        if !backend.try_dispatch() {
            let health = backend.snapshot_health();
            let (error_kind, message) = if !health.enabled {
                (ErrorKind::Disabled, "backend is disabled".to_string())
            } else if health.budget_exceeded {
                if backend.config.log_budget_exceeded {
                    warn!(backend = backend.name(), request_id = %kind.id(), "backend spend budget exceeded");
                }
                (ErrorKind::BudgetExceeded, "backend spend budget exceeded".to_string())
            } else {
                (ErrorKind::CircuitOpen, "circuit open for backend".to_string())
            };
            self.metrics.record_error(backend.name(), &error_kind.to_string());
            return Response::failure(backend.name(), error_kind, message);
        }

        let _permit = match self.rate_limiter.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                self.metrics.record_error(backend.name(), &err.kind().to_string());
                return Response::failure(backend.name(), err.kind(), err.to_string());
            }
        };

        let request = kind.with_defaults(&backend.config, &self.settings);

        self.metrics.inc_active(backend.name());
        let start = Instant::now();
        let result = request.invoke(backend.adapter.as_ref()).await;
        let elapsed = start.elapsed();
        self.metrics.dec_active(backend.name());

        match result {
            Ok(mut response) => {
                response.backend = backend.name().to_string();
                if response.duration_ms == 0 {
                    response.duration_ms = elapsed.as_millis() as u64;
                }
                let cost = match (response.prompt_tokens, response.completion_tokens) {
                    (Some(p), Some(c)) => backend.estimate_cost_usd(p, c),
                    _ => 0.0,
                };
                backend.record_success(elapsed.as_millis() as u64, cost);

                self.metrics.record_request(backend.name(), &response.model, "success", elapsed.as_secs_f64());
                if let (Some(p), Some(c)) = (response.prompt_tokens, response.completion_tokens) {
                    self.metrics.record_tokens(backend.name(), &response.model, "prompt", p);
                    self.metrics.record_tokens(backend.name(), &response.model, "completion", c);
                    self.metrics.record_tokens(backend.name(), &response.model, "total", p + c);
                }
                if cost > 0.0 {
                    self.metrics.record_cost(backend.name(), &response.model, cost);
                }
                self.metrics.set_budget(backend.name(), "current", backend.spend_usd());
                if let Some(max) = backend.config.max_spend_usd {
                    self.metrics.set_budget(backend.name(), "max", max);
                }
                self.metrics.set_backend_health(backend.name(), true);
                response
            }
            Err(err) => {
                let error_kind = err.kind();
                backend.record_failure(error_kind, err.to_string());
                self.metrics.record_request(backend.name(), &backend.config.model_name, "failure", elapsed.as_secs_f64());
                self.metrics.record_error(backend.name(), &error_kind.to_string());
                self.metrics.set_backend_health(backend.name(), backend.snapshot_health().is_healthy);
                Response::failure(backend.name(), error_kind, err.to_string())
            }
        }
    }
}

/// `RetryDelayMs * 2^(attempt-1)` capped at 30s when exponential backoff is
/// enabled, else a flat `RetryDelayMs`; rate-limit errors get a 3x multiplier
/// on top (also capped); ±10% jitter either way so a burst of retries
/// doesn't re-synchronize on the same backend.
fn backoff_delay(attempt: u32, base_ms: u64, exponential: bool, error_kind: Option<ErrorKind>) -> Duration {
    const MAX_DELAY_MS: u64 = 30_000;

    let mut delay_ms = if exponential {
        let shift = attempt.saturating_sub(1).min(20);
        base_ms.saturating_mul(1u64 << shift).min(MAX_DELAY_MS)
    } else {
        base_ms
    };

    if error_kind == Some(ErrorKind::RateLimit) {
        delay_ms = delay_ms.saturating_mul(3).min(MAX_DELAY_MS);
    }

    let jitter_range = (delay_ms as f64 * 0.1) as i64;
    let jitter = if jitter_range > 0 { rand::thread_rng().gen_range(-jitter_range..=jitter_range) } else { 0 };
    Duration::from_millis((delay_ms as i64 + jitter).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::circuit::CircuitBreaker;
    use crate::config::{BackendType, CircuitBreakerConfig, RateLimitConfig};
    use crate::error::ErrorKind;
    use crate::request::ChatMessage;
    use crate::testing::{FakeAdapter, Scripted};

    fn fake_backend(name: &str, priority: u32, adapter: FakeAdapter) -> BackendInstance {
        let mut cfg = BackendConfig::new(name, BackendType::OpenAi, "http://x", "m");
        cfg.priority = priority;
        BackendInstance::new(cfg, Box::new(adapter), CircuitBreaker::new(CircuitBreakerConfig::default()))
    }

    fn chat_request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn failover_falls_through_to_next_backend_on_failure() {
        let primary = fake_backend("primary", 0, FakeAdapter::always_failing("primary", ErrorKind::BadRequest, "nope"));
        let secondary = fake_backend("secondary", 1, FakeAdapter::always_succeeding("secondary", "ok"));
        let mut settings = RootConfig::default();
        settings.selection_strategy = SelectionStrategy::Failover;
        let service = Service::with_backends(settings, vec![primary, secondary]);

        let response = service.chat(chat_request()).await;
        assert!(response.success);
        assert_eq!(response.backend, "secondary");
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_before_giving_up() {
        let adapter = FakeAdapter::new(
            "flaky",
            vec![Scripted::failure(ErrorKind::ServerError, "boom"), Scripted::success("ok")],
        );
        let backend = fake_backend("flaky", 0, adapter);
        let mut settings = RootConfig::default();
        settings.retry_delay_ms = 1;
        settings.max_retries = 2;
        let service = Service::with_backends(settings, vec![backend]);

        let response = service.chat(chat_request()).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn non_retryable_failure_does_not_retry() {
        let adapter = FakeAdapter::always_failing("bad", ErrorKind::BadRequest, "nope");
        let backend = fake_backend("bad", 0, adapter);
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, vec![backend]);

        let response = service.chat(chat_request()).await;
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::BadRequest));
    }

    #[tokio::test]
    async fn no_candidates_returns_no_backend() {
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, Vec::new());
        let response = service.chat(chat_request()).await;
        assert_eq!(response.error_kind, Some(ErrorKind::NoBackend));
    }

    #[tokio::test]
    async fn simultaneous_returns_first_success_as_primary_with_others_as_alternatives() {
        let a = fake_backend("a", 0, FakeAdapter::always_failing("a", ErrorKind::ServerError, "down"));
        let b = fake_backend("b", 1, FakeAdapter::always_succeeding("b", "ok"));
        let mut settings = RootConfig::default();
        settings.selection_strategy = SelectionStrategy::Simultaneous;
        let service = Service::with_backends(settings, vec![a, b]);

        let response = service.chat(chat_request()).await;
        assert!(response.success);
        assert_eq!(response.backend, "b");
        assert_eq!(response.alternative_responses.len(), 1);
        assert!(!response.alternative_responses[0].success);
    }

    #[tokio::test]
    async fn preferred_backend_overrides_strategy() {
        let a = fake_backend("a", 0, FakeAdapter::always_succeeding("a", "from-a"));
        let b = fake_backend("b", 1, FakeAdapter::always_succeeding("b", "from-b"));
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, vec![a, b]);

        let mut request = chat_request();
        request.preferred_backend = Some("b".to_string());
        let response = service.chat(request).await;
        assert_eq!(response.backend, "b");
    }

    #[tokio::test]
    async fn disabled_backend_is_not_available() {
        let mut cfg = BackendConfig::new("off", BackendType::OpenAi, "http://x", "m");
        cfg.enabled = false;
        let backend = BackendInstance::new(
            cfg,
            Box::new(FakeAdapter::always_succeeding("off", "ok")),
            CircuitBreaker::new(CircuitBreakerConfig::default()),
        );
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, vec![backend]);
        assert!(service.available_backends().is_empty());
        let response = service.chat(chat_request()).await;
        assert_eq!(response.error_kind, Some(ErrorKind::NoBackend));
    }

    #[tokio::test]
    async fn rate_limit_window_rejects_once_exhausted() {
        let backend = fake_backend("limited", 0, FakeAdapter::always_succeeding("limited", "ok"));
        let mut settings = RootConfig::default();
        settings.max_retries = 0;
        settings.rate_limit = RateLimitConfig { enabled: true, max_requests: 1, window_seconds: 3600, max_concurrent_requests: 10, queue_limit: 50 };
        let service = Service::with_backends(settings, vec![backend]);

        let first = service.chat(chat_request()).await;
        assert!(first.success);
        let second = service.chat(chat_request()).await;
        assert!(!second.success);
        assert_eq!(second.error_kind, Some(ErrorKind::RateLimit));
    }

    #[tokio::test]
    async fn get_statistics_reflects_completed_requests() {
        let backend = fake_backend("tracked", 0, FakeAdapter::always_succeeding("tracked", "ok"));
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, vec![backend]);
        service.chat(chat_request()).await;
        let stats = service.get_statistics();
        assert_eq!(stats.get("tracked").unwrap().successful_requests, 1);
    }

    #[tokio::test]
    async fn response_carries_the_originating_request_id() {
        let backend = fake_backend("tracked", 0, FakeAdapter::always_succeeding("tracked", "ok"));
        let settings = RootConfig::default();
        let service = Service::with_backends(settings, vec![backend]);
        let request = chat_request();
        let request_id = request.id;
        let response = service.chat(request).await;
        assert_eq!(response.request_id, Some(request_id));
    }

    #[test]
    fn duplicate_backend_names_are_rejected_at_construction() {
        let registry = PluginRegistry::new();
        let mut settings = RootConfig::default();
        settings.backends = vec![
            BackendConfig::new("dup", BackendType::OpenAi, "http://x", "m"),
            BackendConfig::new("dup", BackendType::OpenAi, "http://y", "m"),
        ];
        let err = Service::new(settings, &registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
