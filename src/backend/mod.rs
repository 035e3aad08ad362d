//! A single configured backend: its adapter, circuit breaker, latency
//! history, and budget tracking, all wrapped behind one handle the selector
//! and service operate on.

pub mod circuit;
pub mod health;

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};

use crate::adapters::Adapter;
use crate::config::{BackendConfig, SpendResetPeriod};
use crate::error::ErrorKind;

use circuit::{CircuitBreaker, CircuitState};
use health::BackendHealth;

/// How many recent latency samples to keep, per §4.2's "bounded ring of 100".
const LATENCY_WINDOW: usize = 100;

/// One configured, live backend. The circuit breaker and spend/latency
/// bookkeeping share one `std::sync::Mutex` since they're always updated
/// together and each update is O(1) — per the design notes, one per-instance
/// mutex, not several, and never a router-wide lock.
pub struct BackendInstance {
    pub config: BackendConfig,
    pub adapter: Box<dyn Adapter>,
    state: Mutex<InstanceState>,
}

struct InstanceState {
    circuit: CircuitBreaker,
    successful_requests: u64,
    failed_requests: u64,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
    latencies_ms: VecDeque<u64>,
    current_spend_usd: f64,
    budget_exceeded: bool,
    spend_period_start: DateTime<Utc>,
}

impl BackendInstance {
    pub fn new(config: BackendConfig, adapter: Box<dyn Adapter>, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            state: Mutex::new(InstanceState {
                circuit: circuit_breaker,
                successful_requests: 0,
                failed_requests: 0,
                last_error: None,
                last_success_at: None,
                latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
                current_spend_usd: 0.0,
                budget_exceeded: false,
                spend_period_start: Utc::now(),
            }),
            config,
            adapter,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Non-mutating pre-dispatch check: enabled, budget not exceeded this
    /// period, circuit not fully open. Used to build the candidate list for
    /// selection (`Service::candidates`, `available_backends`) — safe to
    /// call repeatedly for the same request without claiming the circuit
    /// breaker's single HalfOpen probe slot. Rolls the spend period boundary
    /// first so a just-reset backend is immediately eligible again.
    pub fn can_dispatch(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        self.roll_spend_period_if_needed(&mut state);
        self.refresh_budget_exceeded(&mut state);
        if state.budget_exceeded {
            return false;
        }
        state.circuit.is_available()
    }

    /// The actual one-shot dispatch gate, checked immediately before issuing
    /// the adapter call. Distinct from `can_dispatch`: while HalfOpen, this
    /// claims the single in-flight probe slot, so concurrent callers past
    /// the first are short-circuited here rather than at selection time.
    pub fn try_dispatch(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        self.roll_spend_period_if_needed(&mut state);
        self.refresh_budget_exceeded(&mut state);
        if state.budget_exceeded {
            return false;
        }
        state.circuit.can_execute()
    }

    pub fn record_success(&self, latency_ms: u64, cost_usd: f64) {
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        state.circuit.record_success();
        state.successful_requests += 1;
        state.last_success_at = Some(Utc::now());
        if state.latencies_ms.len() == LATENCY_WINDOW {
            state.latencies_ms.pop_front();
        }
        state.latencies_ms.push_back(latency_ms);
        self.roll_spend_period_if_needed(&mut state);
        state.current_spend_usd += cost_usd;
        self.refresh_budget_exceeded(&mut state);
    }

    pub fn record_failure(&self, error_kind: ErrorKind, message: impl Into<String>) {
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        state.circuit.record_failure();
        state.failed_requests += 1;
        state.last_error = Some(message.into());
        let _ = error_kind;
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        let state = self.state.lock().expect("backend state mutex poisoned");
        if state.latencies_ms.is_empty() {
            return None;
        }
        let sum: u64 = state.latencies_ms.iter().sum();
        Some(sum as f64 / state.latencies_ms.len() as f64)
    }

    pub fn spend_usd(&self) -> f64 {
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        self.roll_spend_period_if_needed(&mut state);
        state.current_spend_usd
    }

    fn refresh_budget_exceeded(&self, state: &mut InstanceState) {
        state.budget_exceeded = match self.config.max_spend_usd {
            Some(max) => state.current_spend_usd >= max,
            None => false,
        };
    }

    /// Daily = 24h aligned to UTC midnight; Weekly = 7 days aligned to
    /// `spend_reset_day_of_week`; Monthly = aligned to
    /// `spend_reset_day_of_month`; Never = no reset.
    fn roll_spend_period_if_needed(&self, state: &mut InstanceState) {
        let period = self.config.spend_reset_period;
        if period == SpendResetPeriod::Never {
            return;
        }
        let now = Utc::now();
        let boundary_crossed = match period {
            SpendResetPeriod::Never => false,
            SpendResetPeriod::Daily => now.date_naive() != state.spend_period_start.date_naive(),
            SpendResetPeriod::Weekly => {
                let target_day = self.config.spend_reset_day_of_week as u32 % 7;
                let days_elapsed = now.date_naive().signed_duration_since(state.spend_period_start.date_naive()).num_days();
                days_elapsed >= 7 && now.weekday().num_days_from_sunday() == target_day
            }
            SpendResetPeriod::Monthly => {
                (now.year(), now.month()) != (state.spend_period_start.year(), state.spend_period_start.month())
                    && now.day() >= self.config.spend_reset_day_of_month as u32
            }
        };
        if boundary_crossed {
            state.current_spend_usd = 0.0;
            state.budget_exceeded = false;
            state.spend_period_start = now;
        }
    }

    pub fn snapshot_health(&self) -> BackendHealth {
        let mut state = self.state.lock().expect("backend state mutex poisoned");
        self.roll_spend_period_if_needed(&mut state);
        self.refresh_budget_exceeded(&mut state);
        let avg_latency_ms = if state.latencies_ms.is_empty() {
            None
        } else {
            let sum: u64 = state.latencies_ms.iter().sum();
            Some(sum as f64 / state.latencies_ms.len() as f64)
        };
        BackendHealth {
            name: self.config.name.clone(),
            is_healthy: health::is_healthy(state.successful_requests, state.failed_requests),
            avg_latency_ms,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            last_error: state.last_error.clone(),
            last_success_at: state.last_success_at,
            circuit_state: state.circuit.state(),
            current_spend_usd: state.current_spend_usd,
            max_spend_usd: self.config.max_spend_usd,
            budget_exceeded: state.budget_exceeded,
            spend_period_start: state.spend_period_start,
            enabled: self.config.enabled,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.state.lock().expect("backend state mutex poisoned").circuit.state()
    }

    pub fn estimate_cost_usd(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let input = prompt_tokens as f64 / 1_000_000.0 * self.config.cost_per_million_input_tokens;
        let output = completion_tokens as f64 / 1_000_000.0 * self.config.cost_per_million_output_tokens;
        input + output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Adapter;
    use crate::config::{BackendConfig, BackendType, CircuitBreakerConfig};
    use crate::error::RouterError;
    use crate::request::ChatRequest;
    use crate::response::Response;
    use async_trait::async_trait;

    struct StubAdapter;

    #[async_trait]
    impl Adapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Response, RouterError> {
            Ok(Response::success("stub", "m", "ok"))
        }
    }

    fn instance(max_spend: Option<f64>) -> BackendInstance {
        let mut config = BackendConfig::new("b", BackendType::OpenAi, "http://x", "gpt-4");
        config.max_spend_usd = max_spend;
        config.cost_per_million_input_tokens = 1_000_000.0;
        config.cost_per_million_output_tokens = 1_000_000.0;
        BackendInstance::new(config, Box::new(StubAdapter), CircuitBreaker::new(CircuitBreakerConfig::default()))
    }

    #[test]
    fn budget_scenario_2_exceeded_after_500_requests() {
        let mut config = BackendConfig::new("B", BackendType::OpenAi, "http://x", "m");
        config.max_spend_usd = Some(0.01);
        config.cost_per_million_input_tokens = 1000.0;
        config.cost_per_million_output_tokens = 1000.0;
        let inst = BackendInstance::new(config, Box::new(StubAdapter), CircuitBreaker::new(CircuitBreakerConfig::default()));

        for _ in 0..500 {
            assert!(inst.can_dispatch());
            let cost = inst.estimate_cost_usd(10, 10);
            inst.record_success(1, cost);
        }
        assert!((inst.spend_usd() - 0.01).abs() < 1e-9);
        assert!(!inst.can_dispatch());
    }

    #[test]
    fn fresh_instance_reports_healthy() {
        let inst = instance(None);
        assert!(inst.snapshot_health().is_healthy);
    }

    #[test]
    fn only_failures_reports_unhealthy() {
        let inst = instance(None);
        inst.record_failure(ErrorKind::ServerError, "boom");
        assert!(!inst.snapshot_health().is_healthy);
    }

    #[test]
    fn disabled_backend_never_dispatches() {
        let mut config = BackendConfig::new("b", BackendType::OpenAi, "http://x", "gpt-4");
        config.enabled = false;
        let inst = BackendInstance::new(config, Box::new(StubAdapter), CircuitBreaker::new(CircuitBreakerConfig::default()));
        assert!(!inst.can_dispatch());
    }

    #[test]
    fn average_latency_tracks_recent_samples() {
        let inst = instance(None);
        inst.record_success(100, 0.0);
        inst.record_success(200, 0.0);
        assert_eq!(inst.average_latency_ms(), Some(150.0));
    }

    #[test]
    fn cost_estimate_uses_per_million_rates() {
        let inst = instance(None);
        let cost = inst.estimate_cost_usd(1_000_000, 0);
        assert!((cost - 1_000_000.0).abs() < 0.001);
    }
}
