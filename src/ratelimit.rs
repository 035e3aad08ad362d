//! Process-wide rate limiting.
//!
//! Resolved Open Question: the spec leaves per-backend vs. process-wide rate
//! limiting unspecified. This implements one shared limiter used by the
//! `Service` ahead of backend selection, since a single deployment is
//! typically fronting one quota-constrained account regardless of how many
//! backends are configured behind it. Combines a concurrency cap (semaphore)
//! with a fixed-window token bucket.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::RateLimitConfig;
use crate::error::RouterError;

struct Window {
    count: u32,
    started_at: Instant,
}

pub struct RateLimiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    queue_limit: u32,
    queued: AtomicU32,
    semaphore: Semaphore,
    bucket: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_seconds.max(1)),
            queue_limit: config.queue_limit,
            queued: AtomicU32::new(0),
            semaphore: Semaphore::new(config.max_concurrent_requests.max(1) as usize),
            bucket: Mutex::new(Window { count: 0, started_at: Instant::now() }),
        }
    }

    /// Acquire a concurrency permit and a token-bucket slot. The returned
    /// guard releases the concurrency permit on drop; the bucket slot is
    /// consumed immediately and not returned on failure, matching a
    /// fixed-window limiter (not leaky-bucket-on-success).
    ///
    /// Callers that find the concurrency semaphore already saturated queue
    /// up to `queue_limit` deep waiting for a permit; beyond that, the
    /// request fails immediately rather than joining an unbounded wait line.
    pub async fn acquire(&self) -> Result<Option<SemaphorePermit<'_>>, RouterError> {
        if !self.enabled {
            return Ok(None);
        }
        self.check_window()?;

        if let Ok(permit) = self.semaphore.try_acquire() {
            return Ok(Some(permit));
        }

        if self.queued.fetch_add(1, Ordering::SeqCst) >= self.queue_limit {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(RouterError::RateLimit("rate limiter queue limit exceeded".to_string()));
        }
        let result = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RouterError::Internal("rate limiter semaphore closed".to_string()));
        self.queued.fetch_sub(1, Ordering::SeqCst);
        result.map(Some)
    }

    fn check_window(&self) -> Result<(), RouterError> {
        let mut window = self.bucket.lock().expect("rate limiter mutex poisoned");
        if window.started_at.elapsed() >= self.window {
            window.count = 0;
            window.started_at = Instant::now();
        }
        if window.count >= self.max_requests {
            return Err(RouterError::RateLimit("request rate limit exceeded".to_string()));
        }
        window.count += 1;
        Ok(())
    }
}
