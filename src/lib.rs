//! A provider-agnostic LLM router: one request shape in, fanned out across
//! configured backends (OpenAI, Azure OpenAI, Anthropic, Google, Cohere,
//! Ollama/LM Studio, EasyNMT, llama.cpp, generic OpenAI-compatible, and
//! plugin-registered custom adapters) with retry, backoff, circuit breaking,
//! per-backend spend budgets, rate limiting, and Prometheus metrics.
//!
//! ## Layout
//!
//! - [`config`] — validated configuration structs (`RootConfig`, `BackendConfig`, ...)
//! - [`request`] / [`response`] — the neutral request/response types every adapter speaks
//! - [`error`] — the `ErrorKind` classification and internal `RouterError`
//! - [`adapters`] — per-backend wire protocol translation behind the `Adapter` trait
//! - [`backend`] — `BackendInstance` (circuit breaker, budget, latency history) per configured backend
//! - [`selector`] — pure backend-ordering strategies (failover, round robin, ...)
//! - [`ratelimit`] — the process-wide concurrency + token-bucket limiter
//! - [`metrics`] — the Prometheus registry and recording helpers
//! - [`plugin`] — the third-party adapter extension point
//! - [`service`] — [`Service`], the router's public entry point
//! - [`testing`] — test doubles (`FakeAdapter`) for exercising `Service` without network calls
//!
//! ## Example
//!
//! ```rust,no_run
//! use llm_router_core::config::{BackendConfig, BackendType, RootConfig};
//! use llm_router_core::plugin::PluginRegistry;
//! use llm_router_core::request::ChatRequest;
//! use llm_router_core::service::Service;
//! use llm_router_core::ChatMessage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut settings = RootConfig::default();
//! settings.backends.push(BackendConfig::new(
//!     "openai-primary",
//!     BackendType::OpenAi,
//!     "https://api.openai.com/v1",
//!     "gpt-4o",
//! ));
//!
//! let registry = PluginRegistry::new();
//! let service = Service::new(settings, &registry)?;
//!
//! let response = service.chat(ChatRequest::new(vec![ChatMessage::user("hello")])).await;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod ratelimit;
pub mod request;
pub mod response;
pub mod selector;
pub mod service;
pub mod testing;

pub use adapters::Adapter;
pub use backend::circuit::CircuitState;
pub use backend::health::BackendHealth;
pub use backend::BackendInstance;
pub use config::{BackendConfig, BackendType, RootConfig, SelectionStrategy};
pub use error::{ErrorKind, RouterError};
pub use metrics::MetricsSink;
pub use plugin::{AdapterFactory, PluginMetadata, PluginRegistry};
pub use request::{ChatMessage, ChatRequest, CompletionRequest, Role};
pub use response::Response;
pub use service::{BackendStats, Service};

/// Convenience alias for the internal error type used throughout this crate.
pub type Result<T> = std::result::Result<T, RouterError>;
