//! Point-in-time health snapshot returned by `BackendInstance::snapshot_health`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit::CircuitState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub name: String,
    pub is_healthy: bool,
    pub avg_latency_ms: Option<f64>,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub current_spend_usd: f64,
    pub max_spend_usd: Option<f64>,
    pub budget_exceeded: bool,
    pub spend_period_start: DateTime<Utc>,
    pub enabled: bool,
}

impl BackendHealth {
    /// Whether the selector should consider this backend a candidate:
    /// enabled, budget not exceeded, and circuit not fully open.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.budget_exceeded && self.circuit_state != CircuitState::Open
    }
}

/// `IsHealthy := (successCount > 0) ∨ (failureCount == 0)` — a freshly
/// constructed instance is healthy; an instance with only failures and no
/// successes is not.
pub(super) fn is_healthy(successful_requests: u64, failed_requests: u64) -> bool {
    successful_requests > 0 || failed_requests == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_instance_is_healthy() {
        assert!(is_healthy(0, 0));
    }

    #[test]
    fn any_success_keeps_it_healthy() {
        assert!(is_healthy(1, 50));
    }

    #[test]
    fn only_failures_is_unhealthy() {
        assert!(!is_healthy(0, 1));
    }
}
