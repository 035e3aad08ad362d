//! Prometheus-backed metrics sink.
//!
//! The router records into these on every request; exposing them over HTTP
//! (or any other transport) is the embedding application's job — this module
//! only owns the registry and the `render` text-exposition helper.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};

/// Bucket boundaries tuned for LLM request latency, which tends to sit in
/// the hundreds-of-milliseconds to tens-of-seconds range.
fn duration_buckets() -> Vec<f64> {
    vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
}

pub struct MetricsSink {
    registry: Registry,
    pub requests_total: CounterVec,
    pub request_duration_seconds: HistogramVec,
    pub tokens_total: CounterVec,
    pub estimated_cost_usd: CounterVec,
    pub errors_total: CounterVec,
    pub backend_health: GaugeVec,
    pub active_requests: GaugeVec,
    pub backend_budget_usd: GaugeVec,
}

impl MetricsSink {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Total completion/chat requests handled per backend"),
            &["backend", "model", "status"],
        )
        .expect("valid metric opts");

        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "Request latency observed by the router, per backend",
            )
            .buckets(duration_buckets()),
            &["backend", "model"],
        )
        .expect("valid metric opts");

        let tokens_total = CounterVec::new(
            Opts::new("tokens_total", "Tokens consumed, by kind"),
            &["backend", "model", "token_type"],
        )
        .expect("valid metric opts");

        let estimated_cost_usd = CounterVec::new(
            Opts::new("estimated_cost_usd", "Estimated spend attributed to a backend"),
            &["backend", "model"],
        )
        .expect("valid metric opts");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Failed requests, by error kind"),
            &["backend", "error_type"],
        )
        .expect("valid metric opts");

        let backend_health = GaugeVec::new(
            Opts::new("backend_health", "1 if the backend is currently considered healthy, else 0"),
            &["backend"],
        )
        .expect("valid metric opts");

        let active_requests = GaugeVec::new(
            Opts::new("active_requests", "In-flight requests currently dispatched to a backend"),
            &["backend"],
        )
        .expect("valid metric opts");

        let backend_budget_usd = GaugeVec::new(
            Opts::new("backend_budget_usd", "Spend budget for a backend in the current period, current and max"),
            &["backend", "limit_type"],
        )
        .expect("valid metric opts");

        for collector in [
            Box::new(requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(request_duration_seconds.clone()),
            Box::new(tokens_total.clone()),
            Box::new(estimated_cost_usd.clone()),
            Box::new(errors_total.clone()),
            Box::new(backend_health.clone()),
            Box::new(active_requests.clone()),
            Box::new(backend_budget_usd.clone()),
        ] {
            registry.register(collector).expect("metric names are unique");
        }

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            tokens_total,
            estimated_cost_usd,
            errors_total,
            backend_health,
            active_requests,
            backend_budget_usd,
        }
    }

    pub fn record_request(&self, backend: &str, model: &str, status: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[backend, model, status]).inc();
        self.request_duration_seconds.with_label_values(&[backend, model]).observe(duration_secs);
    }

    pub fn record_tokens(&self, backend: &str, model: &str, token_type: &str, count: u32) {
        self.tokens_total
            .with_label_values(&[backend, model, token_type])
            .inc_by(count as f64);
    }

    pub fn record_cost(&self, backend: &str, model: &str, usd: f64) {
        self.estimated_cost_usd.with_label_values(&[backend, model]).inc_by(usd);
    }

    pub fn record_error(&self, backend: &str, error_type: &str) {
        self.errors_total.with_label_values(&[backend, error_type]).inc();
    }

    pub fn set_backend_health(&self, backend: &str, healthy: bool) {
        self.backend_health.with_label_values(&[backend]).set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn inc_active(&self, backend: &str) {
        self.active_requests.with_label_values(&[backend]).inc();
    }

    pub fn dec_active(&self, backend: &str) {
        self.active_requests.with_label_values(&[backend]).dec();
    }

    /// `limit_type` is `"current"` (spend so far this period) or `"max"`
    /// (the configured cap), per spec's two-series `backend_budget_usd`.
    pub fn set_budget(&self, backend: &str, limit_type: &str, usd: f64) {
        self.backend_budget_usd.with_label_values(&[backend, limit_type]).set(usd);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for well-formed collectors");
        String::from_utf8(buffer).expect("prometheus text output is always utf8")
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}
