use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Dispatcher-side metrics registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    dispatch_requests: CounterVec,
    dispatch_errors: CounterVec,
    cancel_signals: CounterVec,
    plan_serialize_seconds: Histogram,
    broker_reduce_seconds: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_dispatch(&self, op: &str) {
        self.inner.dispatch_requests.with_label_values(&[op]).inc();
    }

    pub fn record_dispatch_error(&self, op: &str) {
        self.inner.dispatch_errors.with_label_values(&[op]).inc();
    }

    pub fn record_cancel(&self, outcome: &str) {
        self.inner.cancel_signals.with_label_values(&[outcome]).inc();
    }

    pub fn observe_plan_serialize_seconds(&self, secs: f64) {
        self.inner.plan_serialize_seconds.observe(secs.max(0.0));
    }

    pub fn observe_broker_reduce_seconds(&self, secs: f64) {
        self.inner.broker_reduce_seconds.observe(secs.max(0.0));
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let dispatch_requests = counter(
            &registry,
            "msq_dispatch_requests_total",
            "Fan-out dispatch operations started, by operation kind",
            &["op"],
        );
        let dispatch_errors = counter(
            &registry,
            "msq_dispatch_errors_total",
            "Fan-out dispatch operations that failed, by operation kind",
            &["op"],
        );
        let cancel_signals = counter(
            &registry,
            "msq_cancel_signals_total",
            "Best-effort cancel signals sent to worker servers, by outcome",
            &["outcome"],
        );
        let plan_serialize_seconds = histogram(
            &registry,
            "msq_plan_serialize_seconds",
            "Wall time spent serializing all stage plans of one request",
        );
        let broker_reduce_seconds = histogram(
            &registry,
            "msq_broker_reduce_seconds",
            "Wall time spent draining the reduce mailbox of one request",
        );
        Self {
            registry,
            dispatch_requests,
            dispatch_errors,
            cancel_signals,
            plan_serialize_seconds,
            broker_reduce_seconds,
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let h = Histogram::with_opts(HistogramOpts::new(name, help)).expect("histogram");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide metrics registry, built on first access.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
