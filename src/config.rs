//! Validated configuration structs.
//!
//! The router receives these already populated — loading them from a file,
//! environment, or secret store is an external collaborator's job (see
//! Non-goals). They derive `Deserialize` purely so that collaborator can use
//! whatever mechanism it likes to produce one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Strategy used to pick backends for a request absent a per-request
/// override (`preferred_backend`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Failover,
    RoundRobin,
    LowestLatency,
    Random,
    Specific,
    Simultaneous,
}

/// Tag selecting which built-in adapter a backend configuration uses. When
/// `custom_backend_type` is set on the owning [`BackendConfig`], it
/// overrides this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    OpenAi,
    AzureOpenAi,
    Anthropic,
    Google,
    Cohere,
    Ollama,
    LmStudio,
    EasyNmt,
    LlamaCpp,
    GenericOpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendResetPeriod {
    Never,
    Daily,
    Weekly,
    Monthly,
}

/// Per-backend configuration. Every field that only applies to a subset of
/// adapters is `Option`/defaulted so a single flat struct can describe any
/// backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub custom_backend_type: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model_name: String,
    pub deployment_name: Option<String>,
    pub api_version: Option<String>,
    pub organization_id: Option<String>,
    pub anthropic_version: Option<String>,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub max_input_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub enable_streaming: bool,
    #[serde(default)]
    pub enable_function_calling: bool,
    #[serde(default)]
    pub cost_per_million_input_tokens: f64,
    #[serde(default)]
    pub cost_per_million_output_tokens: f64,
    pub max_spend_usd: Option<f64>,
    #[serde(default = "default_reset_period")]
    pub spend_reset_period: SpendResetPeriod,
    #[serde(default)]
    pub spend_reset_day_of_week: u8,
    #[serde(default = "default_day_of_month")]
    pub spend_reset_day_of_month: u8,
    #[serde(default)]
    pub log_budget_exceeded: bool,
    #[serde(default)]
    pub additional_headers: HashMap<String, String>,

    // LlamaCpp-specific.
    pub model_path: Option<String>,
    pub model_url: Option<String>,
    #[serde(default)]
    pub auto_download_model: bool,
    pub context_size: Option<u32>,
    pub gpu_layers: Option<u32>,
    pub threads: Option<u32>,
    #[serde(default)]
    pub use_memory_lock: bool,
    pub seed: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_reset_period() -> SpendResetPeriod {
    SpendResetPeriod::Never
}

fn default_day_of_month() -> u8 {
    1
}

impl BackendConfig {
    /// Minimal constructor for tests and examples; every optional field
    /// defaults to `None`/`false`/zero.
    pub fn new(name: impl Into<String>, backend_type: BackendType, base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type,
            custom_backend_type: None,
            base_url: base_url.into(),
            api_key: String::new(),
            model_name: model_name.into(),
            deployment_name: None,
            api_version: None,
            organization_id: None,
            anthropic_version: None,
            project_id: None,
            location: None,
            temperature: None,
            max_output_tokens: None,
            max_input_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            priority: 0,
            enabled: true,
            timeout_seconds: None,
            max_retries: None,
            enable_streaming: false,
            enable_function_calling: false,
            cost_per_million_input_tokens: 0.0,
            cost_per_million_output_tokens: 0.0,
            max_spend_usd: None,
            spend_reset_period: SpendResetPeriod::Never,
            spend_reset_day_of_week: 0,
            spend_reset_day_of_month: 1,
            log_budget_exceeded: false,
            additional_headers: HashMap::new(),
            model_path: None,
            model_url: None,
            auto_download_model: false,
            context_size: None,
            gpu_layers: None,
            threads: None,
            use_memory_lock: false,
            seed: None,
        }
    }

    pub fn effective_timeout_seconds(&self, settings_default: u64) -> u64 {
        self.timeout_seconds.unwrap_or(settings_default)
    }

    pub fn effective_max_retries(&self, settings_default: u32) -> u32 {
        self.max_retries.unwrap_or(settings_default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_break_duration")]
    pub duration_of_break_seconds: u64,
    #[serde(default = "default_sampling_duration")]
    pub sampling_duration_seconds: u64,
    #[serde(default = "default_minimum_throughput")]
    pub minimum_throughput: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_break_duration() -> u64 {
    30
}
fn default_sampling_duration() -> u64 {
    60
}
fn default_minimum_throughput() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            duration_of_break_seconds: default_break_duration(),
            sampling_duration_seconds: default_sampling_duration(),
            minimum_throughput: default_minimum_throughput(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,
    #[serde(default = "default_queue_limit")]
    pub queue_limit: u32,
}

fn default_max_requests() -> u32 {
    60
}
fn default_window_seconds() -> u64 {
    60
}
fn default_max_concurrent() -> u32 {
    10
}
fn default_queue_limit() -> u32 {
    50
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            max_concurrent_requests: default_max_concurrent(),
            queue_limit: default_queue_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
}

fn default_health_interval() -> u64 {
    60
}
fn default_health_timeout() -> u64 {
    10
}
fn default_unhealthy_threshold() -> u32 {
    3
}
fn default_healthy_threshold() -> u32 {
    2
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_health_interval(),
            timeout_seconds: default_health_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            healthy_threshold: default_healthy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default)]
    pub enable_tracing: bool,
    #[serde(default)]
    pub enable_detailed_logging: bool,
    #[serde(default)]
    pub log_content: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_true")]
    pub enable_cost_tracking: bool,
    #[serde(default)]
    pub log_token_counts: bool,
}

fn default_service_name() -> String {
    "llm-router-core".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            enable_tracing: false,
            enable_detailed_logging: false,
            log_content: false,
            service_name: default_service_name(),
            enable_cost_tracking: true,
            log_token_counts: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub plugin_directory: Option<String>,
    #[serde(default)]
    pub search_subdirectories: bool,
    #[serde(default)]
    pub load_on_startup: bool,
    #[serde(default)]
    pub specific_plugins: Vec<String>,
}

/// Root router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default = "default_strategy")]
    pub selection_strategy: SelectionStrategy,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub use_exponential_backoff: bool,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_strategy() -> SelectionStrategy {
    SelectionStrategy::Failover
}
fn default_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2000
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            selection_strategy: default_strategy(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            use_exponential_backoff: false,
            retry_delay_ms: default_retry_delay(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            caching: CachingConfig::default(),
            health_check: HealthCheckConfig::default(),
            secrets: SecretsConfig::default(),
            telemetry: TelemetryConfig::default(),
            memory: MemoryConfig::default(),
            plugins: PluginsConfig::default(),
            backends: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = RootConfig::default();
        assert_eq!(cfg.timeout_seconds, 120);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.default_temperature, 0.7);
        assert_eq!(cfg.default_max_tokens, 2000);
    }

    #[test]
    fn backend_effective_timeout_falls_back_to_settings() {
        let b = BackendConfig::new("b", BackendType::OpenAi, "http://x", "gpt-4");
        assert_eq!(b.effective_timeout_seconds(120), 120);
    }

    #[test]
    fn deserializes_minimal_json() {
        let json = r#"{
            "backends": [
                {"name": "p", "type": "openai", "base_url": "http://x", "model_name": "gpt-4"}
            ]
        }"#;
        let cfg: RootConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.backends.len(), 1);
        assert_eq!(cfg.backends[0].priority, 0);
        assert!(cfg.backends[0].enabled);
    }
}
