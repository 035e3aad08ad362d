//! Backend selection strategies.
//!
//! Each strategy is a pure function over a snapshot of currently-dispatchable
//! backends (already filtered by `BackendInstance::can_dispatch`) plus any
//! strategy-local state (the round-robin cursor). None of these touch I/O —
//! the Service owns dispatch, retry, and result aggregation.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::backend::BackendInstance;
use crate::config::SelectionStrategy;

/// Ordered list of backends to try, most-preferred first. `Failover` and
/// `Simultaneous` return every candidate; `RoundRobin`, `LowestLatency`, and
/// `Random` return the full ordering too (so the Service can fall through on
/// failure) but only the head is "the" selection for metrics purposes.
pub struct Plan {
    pub order: Vec<usize>,
    pub fan_out: bool,
}

/// Shared round-robin cursor. One instance lives on the `Service`; the
/// selector is otherwise stateless.
#[derive(Default)]
pub struct RoundRobinCursor(AtomicU64);

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn next(&self, modulus: usize) -> usize {
        if modulus == 0 {
            return 0;
        }
        (self.0.fetch_add(1, Ordering::Relaxed) as usize) % modulus
    }
}

/// Build an ordering over `candidates` (indices into the caller's backend
/// list) according to `strategy`. `preferred_backend` overrides everything
/// except `Simultaneous`, per the request-level `preferred_backend` field.
pub fn select(
    strategy: SelectionStrategy,
    candidates: &[(usize, &BackendInstance)],
    preferred_backend: Option<&str>,
    round_robin: &RoundRobinCursor,
) -> Plan {
    if let Some(name) = preferred_backend {
        if strategy != SelectionStrategy::Simultaneous {
            if let Some((idx, _)) = candidates.iter().find(|(_, b)| b.name() == name) {
                return Plan { order: vec![*idx], fan_out: false };
            }
            return Plan { order: Vec::new(), fan_out: false };
        }
    }

    match strategy {
        SelectionStrategy::Failover => {
            let mut sorted: Vec<&(usize, &BackendInstance)> = candidates.iter().collect();
            sorted.sort_by(|(_, a), (_, b)| a.config.priority.cmp(&b.config.priority).then_with(|| a.name().cmp(b.name())));
            Plan { order: sorted.into_iter().map(|(i, _)| *i).collect(), fan_out: false }
        }
        SelectionStrategy::RoundRobin => {
            if candidates.is_empty() {
                return Plan { order: Vec::new(), fan_out: false };
            }
            let start = round_robin.next(candidates.len());
            Plan { order: vec![candidates[start].0], fan_out: false }
        }
        SelectionStrategy::LowestLatency => {
            let mut sorted: Vec<&(usize, &BackendInstance)> = candidates.iter().collect();
            sorted.sort_by(|(_, a), (_, b)| {
                match (a.average_latency_ms(), b.average_latency_ms()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.name().cmp(b.name())),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.name().cmp(b.name()),
                }
            });
            Plan { order: sorted.into_iter().map(|(i, _)| *i).collect(), fan_out: false }
        }
        SelectionStrategy::Random => {
            if candidates.is_empty() {
                return Plan { order: Vec::new(), fan_out: false };
            }
            let mut idxs: Vec<usize> = candidates.iter().map(|(i, _)| *i).collect();
            idxs.shuffle(&mut thread_rng());
            Plan { order: vec![idxs[0]], fan_out: false }
        }
        SelectionStrategy::Specific => {
            // No preferred_backend given at all: nothing names a target, so
            // there is nothing to select. The Service surfaces `NoBackend`.
            Plan { order: Vec::new(), fan_out: false }
        }
        SelectionStrategy::Simultaneous => {
            Plan { order: candidates.iter().map(|(i, _)| *i).collect(), fan_out: true }
        }
    }
}
