use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, warn};

use crate::chain::{Next, Policy};
use crate::context::Context;
use crate::error::Error;
use crate::policy::metrics::MetricsCollector;
use crate::request::Request;
use crate::response::Response;
use crate::util::{lock_unpoisoned, read_unpoisoned, write_unpoisoned};

/// Per-host breaker state, observable for metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }

    /// Gauge encoding: 0=closed, 1=open, 2=half-open.
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Decides whether an outcome counts toward opening the circuit.
pub trait TripClassifier: Send + Sync {
    fn is_failure(&self, status: Option<StatusCode>, error: Option<&Error>) -> bool;
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    error_threshold: u64,
    min_requests: u64,
    sleep_window: Duration,
    success_threshold: u64,
    classifier: Option<Arc<dyn TripClassifier>>,
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CircuitBreakerConfig")
            .field("error_threshold", &self.error_threshold)
            .field("min_requests", &self.min_requests)
            .field("sleep_window", &self.sleep_window)
            .field("success_threshold", &self.success_threshold)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerConfig {
    pub fn standard() -> Self {
        Self {
            error_threshold: 50,
            min_requests: 10,
            sleep_window: Duration::from_secs(5),
            success_threshold: 2,
            classifier: None,
        }
    }

    /// Error percentage (0-100) that opens the circuit once `min_requests`
    /// is reached.
    pub fn error_threshold(mut self, percent: u64) -> Self {
        self.error_threshold = percent.min(100);
        self
    }

    pub fn min_requests(mut self, min_requests: u64) -> Self {
        self.min_requests = min_requests.max(1);
        self
    }

    pub fn sleep_window(mut self, sleep_window: Duration) -> Self {
        self.sleep_window = sleep_window;
        self
    }

    pub fn success_threshold(mut self, success_threshold: u64) -> Self {
        self.success_threshold = success_threshold.max(1);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn TripClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u64,
    successes: u64,
    requests: u64,
    changed_at: Instant,
}

impl BreakerState {
    fn reset_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.requests = 0;
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.reset_counters();
        self.changed_at = Instant::now();
    }
}

#[derive(Debug)]
struct HostBreaker {
    state: Mutex<BreakerState>,
}

impl HostBreaker {
    fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                requests: 0,
                changed_at: Instant::now(),
            }),
        }
    }

    /// Admit or reject a request. `Err` carries how long the circuit has
    /// been open. Open circuits transition to half-open lazily once the
    /// sleep window has passed; that request proceeds as the probe.
    fn admit(&self, sleep_window: Duration) -> Result<(), Duration> {
        let mut state = lock_unpoisoned(&self.state);
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let open_for = state.changed_at.elapsed();
                if open_for >= sleep_window {
                    state.transition(CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(open_for)
                }
            }
        }
    }

    /// Record an outcome; returns (state before, state after).
    fn record(&self, failure: bool, config: &CircuitBreakerConfig) -> (CircuitState, CircuitState) {
        let mut state = lock_unpoisoned(&self.state);
        let before = state.state;
        state.requests = state.requests.saturating_add(1);

        if failure {
            state.failures = state.failures.saturating_add(1);
            match state.state {
                CircuitState::Closed => {
                    if state.requests >= config.min_requests
                        && state.failures.saturating_mul(100)
                            >= config.error_threshold.saturating_mul(state.requests)
                    {
                        state.transition(CircuitState::Open);
                    }
                }
                CircuitState::HalfOpen => {
                    state.transition(CircuitState::Open);
                }
                CircuitState::Open => {}
            }
        } else {
            state.successes = state.successes.saturating_add(1);
            if state.state == CircuitState::HalfOpen
                && state.successes >= config.success_threshold
            {
                state.transition(CircuitState::Closed);
            }
        }

        (before, state.state)
    }

    fn state(&self) -> CircuitState {
        lock_unpoisoned(&self.state).state
    }
}

/// Per-host circuit breaker: short-circuits calls to hosts whose recent
/// error rate crossed the configured threshold, probing for recovery after
/// the sleep window.
pub struct CircuitBreakerPolicy {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<HostBreaker>>>,
    collector: Option<Arc<MetricsCollector>>,
}

impl CircuitBreakerPolicy {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_collector(config, None)
    }

    pub(crate) fn with_collector(
        config: CircuitBreakerConfig,
        collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            collector,
        }
    }

    /// Current state for a host; unknown hosts report closed.
    pub fn state(&self, host: &str) -> CircuitState {
        read_unpoisoned(&self.breakers)
            .get(host)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    fn breaker_for_host(&self, host: &str) -> Arc<HostBreaker> {
        if let Some(found) = read_unpoisoned(&self.breakers).get(host) {
            return Arc::clone(found);
        }
        let mut breakers = write_unpoisoned(&self.breakers);
        Arc::clone(
            breakers
                .entry(host.to_owned())
                .or_insert_with(|| Arc::new(HostBreaker::new())),
        )
    }

    fn is_failure(&self, status: Option<StatusCode>, error: Option<&Error>) -> bool {
        if let Some(classifier) = &self.config.classifier {
            return classifier.is_failure(status, error);
        }
        if error.is_some() {
            return true;
        }
        status.is_some_and(|status| status.as_u16() >= 500)
    }
}

#[async_trait]
impl Policy for CircuitBreakerPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        if request.options().circuit_breaker_disabled() {
            return next.run(ctx, request).await;
        }

        let host = request.host().to_owned();
        let breaker = self.breaker_for_host(&host);

        if let Err(open_for) = breaker.admit(self.config.sleep_window) {
            debug!(host = %host, open_ms = open_for.as_millis() as u64, "circuit open, rejecting request");
            if let Some(collector) = &self.collector {
                collector.set_circuit_breaker_state(&host, CircuitState::Open);
            }
            return Err(Error::CircuitOpen {
                open_ms: open_for.as_millis(),
                method: request.method().clone(),
                uri: request.uri_text().to_owned(),
                host,
            });
        }

        let outcome = next.run(ctx, request).await;

        let (status, error) = match &outcome {
            Ok(response) => (Some(response.status()), None),
            Err(error) => (None, Some(error)),
        };
        let failure = self.is_failure(status, error);
        let (before, after) = breaker.record(failure, &self.config);

        if before != after {
            warn!(host = %host, from = before.as_str(), to = after.as_str(), "circuit breaker transition");
        }
        if let Some(collector) = &self.collector {
            if failure {
                collector.inc_circuit_breaker_failures(&host);
            }
            collector.set_circuit_breaker_state(&host, after);
        }

        outcome
    }
}
