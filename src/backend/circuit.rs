//! Circuit breaker state machine.
//!
//! Closed: requests flow normally, failures are counted in a rolling
//! sampling window. Open: requests are rejected outright until the break
//! duration elapses. HalfOpen: exactly one probe request is allowed through
//! at a time; that probe's success closes the circuit, its failure reopens
//! it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-backend circuit breaker. Guarded by a plain `std::sync::Mutex` in
/// `BackendInstance` — every operation here is O(1) and non-blocking, so
/// there's no reason to pay for an async-aware lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures_in_window: u32,
    successes_in_window: u32,
    half_open_probe_in_flight: bool,
    window_started_at: Instant,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures_in_window: 0,
            successes_in_window: 0,
            half_open_probe_in_flight: false,
            window_started_at: Instant::now(),
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Non-mutating check for whether this backend is worth including in a
    /// selection order: never blocks on the HalfOpen single-probe slot (that
    /// gate is `can_execute`'s job, applied once per actual dispatch
    /// attempt), and treats an Open circuit whose break duration has already
    /// elapsed as selectable without yet performing the transition.
    pub fn is_available(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                elapsed >= Duration::from_secs(self.config.duration_of_break_seconds)
            }
        }
    }

    /// Whether a request may currently be dispatched. Transitions
    /// Open -> HalfOpen on the way out, if the break duration has elapsed,
    /// and in HalfOpen allows exactly one in-flight probe at a time —
    /// concurrent callers that arrive while a probe is already outstanding
    /// are short-circuited.
    pub fn can_execute(&mut self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if self.half_open_probe_in_flight {
                    false
                } else {
                    self.half_open_probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_secs(self.config.duration_of_break_seconds) {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if !self.config.enabled {
            return;
        }
        self.roll_window_if_expired();
        match self.state {
            CircuitState::Closed => {
                self.successes_in_window += 1;
            }
            CircuitState::HalfOpen => {
                // A single successful probe closes the circuit.
                self.close();
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        if !self.config.enabled {
            return;
        }
        match self.state {
            CircuitState::Closed => {
                self.roll_window_if_expired();
                self.failures_in_window += 1;
                let total = self.failures_in_window + self.successes_in_window;
                if total >= self.config.minimum_throughput
                    && self.failures_in_window >= self.config.failure_threshold
                {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn roll_window_if_expired(&mut self) {
        if self.window_started_at.elapsed() >= Duration::from_secs(self.config.sampling_duration_seconds) {
            self.failures_in_window = 0;
            self.successes_in_window = 0;
            self.window_started_at = Instant::now();
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.failures_in_window = 0;
        self.successes_in_window = 0;
        self.half_open_probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.failures_in_window = 0;
        self.successes_in_window = 0;
        self.half_open_probe_in_flight = false;
        self.window_started_at = Instant::now();
    }
}
