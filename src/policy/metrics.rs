use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};

use crate::chain::{Next, Policy};
use crate::context::Context;
use crate::policy::breaker::CircuitState;
use crate::request::Request;
use crate::response::Response;

/// Duration buckets: 1ms to 10s.
const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Prometheus series shared by the metrics policy and the resilience
/// policies. Registered once against a caller-supplied registry.
///
/// Label cardinality is bounded: hosts are normalized, status codes are
/// exact, paths never appear.
pub struct MetricsCollector {
    request_duration: HistogramVec,
    circuit_breaker_state: GaugeVec,
    circuit_breaker_failures: CounterVec,
    retries: CounterVec,
    active_requests: GaugeVec,
    rejected_requests: CounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_client_request_duration_seconds",
                "HTTP client request duration in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method", "status_code", "host"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "http_client_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["host"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_failures = CounterVec::new(
            Opts::new(
                "http_client_circuit_breaker_failures_total",
                "Total failures counted by the circuit breaker",
            ),
            &["host"],
        )?;
        registry.register(Box::new(circuit_breaker_failures.clone()))?;

        let retries = CounterVec::new(
            Opts::new("http_client_retries_total", "Total retry attempts"),
            &["method", "host", "reason"],
        )?;
        registry.register(Box::new(retries.clone()))?;

        let active_requests = GaugeVec::new(
            Opts::new("http_client_active_requests", "In-flight HTTP requests"),
            &["host"],
        )?;
        registry.register(Box::new(active_requests.clone()))?;

        let rejected_requests = CounterVec::new(
            Opts::new(
                "http_client_rejected_requests_total",
                "Requests rejected by the bulkhead",
            ),
            &["host"],
        )?;
        registry.register(Box::new(rejected_requests.clone()))?;

        Ok(Self {
            request_duration,
            circuit_breaker_state,
            circuit_breaker_failures,
            retries,
            active_requests,
            rejected_requests,
        })
    }

    pub(crate) fn observe_request_duration(
        &self,
        method: &str,
        status_code: &str,
        host: &str,
        seconds: f64,
    ) {
        self.request_duration
            .with_label_values(&[method, status_code, host])
            .observe(seconds);
    }

    pub(crate) fn set_circuit_breaker_state(&self, host: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[host])
            .set(state.as_gauge());
    }

    pub(crate) fn inc_circuit_breaker_failures(&self, host: &str) {
        self.circuit_breaker_failures.with_label_values(&[host]).inc();
    }

    pub(crate) fn inc_retries(&self, method: &str, host: &str, reason: &str) {
        self.retries.with_label_values(&[method, host, reason]).inc();
    }

    pub(crate) fn inc_rejected_requests(&self, host: &str) {
        self.rejected_requests.with_label_values(&[host]).inc();
    }

    pub(crate) fn active_requests_guard(&self, host: &str) -> ActiveRequestsGuard {
        let gauge = self.active_requests.with_label_values(&[host]);
        gauge.inc();
        ActiveRequestsGuard { gauge }
    }
}

/// Decrements the active-requests gauge on every exit path.
pub(crate) struct ActiveRequestsGuard {
    gauge: Gauge,
}

impl Drop for ActiveRequestsGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Wraps each call with an in-flight gauge and a duration observation.
/// Failures are recorded with status label "0".
pub struct MetricsPolicy {
    collector: Arc<MetricsCollector>,
}

impl MetricsPolicy {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }
}

#[async_trait]
impl Policy for MetricsPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        let host = request.host().to_owned();
        let method = request.method().as_str().to_owned();

        let _guard = self.collector.active_requests_guard(&host);
        let started = Instant::now();
        let outcome = next.run(ctx, request).await;
        let elapsed = started.elapsed();

        let status_label = match &outcome {
            Ok(response) => response.status().as_u16().to_string(),
            Err(_) => "0".to_owned(),
        };
        self.collector
            .observe_request_duration(&method, &status_label, &host, elapsed.as_secs_f64());

        outcome
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::MetricsCollector;
    use crate::policy::breaker::CircuitState;

    #[test]
    fn registers_all_series_against_the_registry() {
        let registry = Registry::new();
        let collector = MetricsCollector::new(&registry).expect("collector should register");

        collector.observe_request_duration("GET", "200", "svc.internal", 0.02);
        collector.set_circuit_breaker_state("svc.internal", CircuitState::HalfOpen);
        collector.inc_circuit_breaker_failures("svc.internal");
        collector.inc_retries("GET", "svc.internal", "5xx");
        collector.inc_rejected_requests("svc.internal");
        let _guard = collector.active_requests_guard("svc.internal");

        let names: Vec<String> = registry
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        for expected in [
            "http_client_request_duration_seconds",
            "http_client_circuit_breaker_state",
            "http_client_circuit_breaker_failures_total",
            "http_client_retries_total",
            "http_client_active_requests",
            "http_client_rejected_requests_total",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected}");
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        MetricsCollector::new(&registry).expect("first registration should succeed");
        assert!(MetricsCollector::new(&registry).is_err());
    }

    #[test]
    fn active_requests_guard_restores_gauge_on_drop() {
        let registry = Registry::new();
        let collector = MetricsCollector::new(&registry).expect("collector should register");

        {
            let _guard = collector.active_requests_guard("svc.internal");
            let value = collector
                .active_requests
                .with_label_values(&["svc.internal"])
                .get();
            assert_eq!(value, 1.0);
        }
        let value = collector
            .active_requests
            .with_label_values(&["svc.internal"])
            .get();
        assert_eq!(value, 0.0);
    }
}
