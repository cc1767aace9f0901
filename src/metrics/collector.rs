// src/metrics/collector.rs
use crate::health::HealthStatus;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition of every registered family.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Forwarding
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub forward_errors_total: IntCounterVec,

    // Health checking
    pub probes_total: IntCounterVec,
    pub backend_health_status: IntGaugeVec,
    pub evictions_total: IntCounter,
    pub pool_size: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("dispatcher_requests_total", "Total number of forwarded requests"),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatcher_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let forward_errors_total = IntCounterVec::new(
            Opts::new(
                "dispatcher_forward_errors_total",
                "Requests answered with a local failure",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(forward_errors_total.clone()))?;

        let probes_total = IntCounterVec::new(
            Opts::new("dispatcher_probes_total", "Health probes by outcome"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "dispatcher_backend_health_status",
                "Last probe result (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let evictions_total = IntCounter::new(
            "dispatcher_evictions_total",
            "Backends removed from the pool",
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let pool_size = IntGauge::new("dispatcher_pool_size", "Backends currently in the pool")?;
        registry.register(Box::new(pool_size.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            forward_errors_total,
            probes_total,
            backend_health_status,
            evictions_total,
            pool_size,
        })
    }

    pub fn record_request(&self, method: &str, status_code: u16, backend: &str, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status, backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status])
            .observe(duration.as_secs_f64());
    }

    pub fn record_forward_error(&self, kind: &str) {
        self.forward_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_probe(&self, backend: &str, status: HealthStatus) {
        self.probes_total
            .with_label_values(&[backend, status.as_str()])
            .inc();
        self.backend_health_status
            .with_label_values(&[backend])
            .set(if status.is_healthy() { 1 } else { 0 });
    }

    pub fn record_sweep(&self, evicted: usize, pool_size: usize) {
        self.evictions_total.inc_by(evicted as u64);
        self.set_pool_size(pool_size);
    }

    pub fn set_pool_size(&self, pool_size: usize) {
        self.pool_size.set(pool_size as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
