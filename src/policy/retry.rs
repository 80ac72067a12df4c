use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use tracing::debug;

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::chain::{Next, Policy};
use crate::context::{Context, SleepOutcome};
use crate::error::{Error, ErrorCode};
use crate::policy::metrics::MetricsCollector;
use crate::request::Request;
use crate::response::Response;

/// The outcome of one attempt, handed to the retry predicate.
#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub attempt: usize,
    pub max_attempts: usize,
    pub method: Method,
    pub uri: String,
    pub status: Option<StatusCode>,
    pub error_code: Option<ErrorCode>,
}

/// Overrides the default retry predicate.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision) -> bool;
}

#[derive(Clone)]
pub struct RetryConfig {
    max_attempts: usize,
    backoff: Arc<dyn Backoff>,
    retryable_status_codes: BTreeSet<u16>,
    only_idempotent: bool,
    classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("only_idempotent", &self.only_idempotent)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            backoff: Arc::new(ExponentialBackoff::default()),
            retryable_status_codes: default_retryable_status_codes(),
            only_idempotent: true,
            classifier: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    /// Total attempts including the first try; 1 disables retry.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// When false, non-idempotent methods are retried too.
    pub fn only_idempotent(mut self, only_idempotent: bool) -> Self {
        self.only_idempotent = only_idempotent;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [429_u16, 500, 502, 503, 504].into_iter().collect()
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Metric label for why an attempt is being retried.
fn retry_reason(decision: &RetryDecision) -> &'static str {
    match decision.status {
        Some(status) if status.as_u16() == 429 => "429",
        Some(status) if status.as_u16() >= 500 => "5xx",
        Some(_) => "custom",
        None => match decision.error_code {
            Some(ErrorCode::Network) => "network_error",
            _ => "custom",
        },
    }
}

/// Reissues failed calls with backoff between attempts.
///
/// Request bodies are replayed from the buffered source prepared before the
/// first attempt; a streaming body disables retry for that call.
pub struct RetryPolicy {
    config: RetryConfig,
    collector: Option<Arc<MetricsCollector>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_collector(config, None)
    }

    pub(crate) fn with_collector(
        config: RetryConfig,
        collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self { config, collector }
    }

    fn should_retry(&self, decision: &RetryDecision) -> bool {
        if let Some(classifier) = &self.config.classifier {
            return classifier.should_retry(decision);
        }
        match decision.status {
            Some(status) => self.config.retryable_status_codes.contains(&status.as_u16()),
            None => decision.error_code == Some(ErrorCode::Network),
        }
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        let options = request.options();
        let gate_allows = !self.config.only_idempotent
            || options.force_retry_enabled()
            || is_idempotent(request.method());
        if options.retry_disabled()
            || self.config.max_attempts <= 1
            || !gate_allows
            || !request.body().is_replayable()
        {
            return next.run(ctx, request).await;
        }

        let max_attempts = self.config.max_attempts;
        let method = request.method().clone();
        let uri = request.uri_text().to_owned();
        let host = request.host().to_owned();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(attempt_request) = request.try_clone() else {
                return next.run(ctx, request).await;
            };
            let outcome = next.run(ctx, attempt_request).await;

            let decision = RetryDecision {
                attempt,
                max_attempts,
                method: method.clone(),
                uri: uri.clone(),
                status: outcome.as_ref().ok().map(Response::status),
                error_code: outcome.as_ref().err().map(Error::code),
            };
            if !self.should_retry(&decision) {
                return outcome;
            }
            if attempt >= max_attempts {
                return match outcome {
                    Ok(response) => Ok(response),
                    Err(error) => Err(Error::MaxRetriesExceeded {
                        attempts: attempt,
                        method,
                        uri,
                        source: Box::new(error),
                    }),
                };
            }

            // Keep the connection reusable before the next attempt.
            if let Ok(response) = outcome {
                response.drain().await;
            }

            let reason = retry_reason(&decision);
            if let Some(collector) = &self.collector {
                collector.inc_retries(method.as_str(), &host, reason);
            }
            debug!(attempt, max_attempts, reason, uri = %uri, "retry scheduled");

            let delay = self.config.backoff.delay(attempt - 1);
            match ctx.sleep(delay).await {
                SleepOutcome::Elapsed => {}
                SleepOutcome::Cancelled => return Err(Error::Canceled { method, uri }),
                SleepOutcome::DeadlineExpired => {
                    return Err(Error::DeadlineExceeded { method, uri });
                }
            }
        }
    }
}
