use std::time::Duration;

use async_trait::async_trait;

use crate::chain::{Next, Policy};
use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    request_timeout: Duration,
}

impl TimeoutConfig {
    pub const fn standard() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Upper bound on the time spent downstream of this policy.
    pub const fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Bounds the time spent downstream by deriving a tighter context deadline
/// and racing the rest of the chain against it.
///
/// Placed inside the retry policy this bounds each attempt; outside, the
/// whole retry loop. The canonical composition puts it innermost.
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Policy for TimeoutPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        if request.options().timeout_disabled() {
            return next.run(ctx, request).await;
        }

        let budget = request
            .options()
            .timeout_override()
            .unwrap_or(self.config.request_timeout);
        let method = request.method().clone();
        let uri = request.uri_text().to_owned();

        let child = ctx.child_with_timeout(budget);
        // The parent deadline is binding when it is tighter than our budget;
        // only expiry of our own deadline is remapped to Timeout.
        let own_deadline_binding = child.remaining().is_some_and(|left| left <= budget)
            && ctx
                .remaining()
                .is_none_or(|parent_left| parent_left >= budget);

        match tokio::time::timeout(budget, next.run(&child, request)).await {
            Ok(Err(Error::DeadlineExceeded {
                method: inner_method,
                uri: inner_uri,
            })) if own_deadline_binding => Err(Error::Timeout {
                timeout_ms: budget.as_millis(),
                method: inner_method,
                uri: inner_uri,
            }),
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(Error::Timeout {
                timeout_ms: budget.as_millis(),
                method,
                uri,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use http::{HeaderMap, Method, StatusCode, Uri};

    use super::{TimeoutConfig, TimeoutPolicy};
    use crate::chain::{Executor, Policy};
    use crate::context::Context;
    use crate::error::Error;
    use crate::request::{Request, RequestBody, RequestOptions};
    use crate::response::Response;
    use crate::transport::Transport;

    fn request(options: RequestOptions) -> Request {
        let uri: Uri = "http://svc.internal/slow".parse().expect("parse uri");
        Request::new(
            Method::GET,
            uri,
            "http://svc.internal/slow".to_owned(),
            HeaderMap::new(),
            RequestBody::Empty,
            options,
        )
    }

    struct SleepingTransport {
        latency: Duration,
    }

    #[async_trait]
    impl Transport for SleepingTransport {
        async fn send(&self, ctx: &Context, request: Request) -> crate::Result<Response> {
            tokio::select! {
                _ = tokio::time::sleep(self.latency) => {
                    Ok(Response::new(StatusCode::OK, HeaderMap::new(), "late"))
                }
                _ = crate::context::deadline_wait(ctx.deadline()) => {
                    Err(Error::DeadlineExceeded {
                        method: request.method().clone(),
                        uri: request.uri_text().to_owned(),
                    })
                }
            }
        }
    }

    fn executor(timeout: TimeoutConfig, latency: Duration) -> Executor {
        Executor::new(
            vec![Arc::new(TimeoutPolicy::new(timeout)) as Arc<dyn Policy>],
            Arc::new(SleepingTransport { latency }) as Arc<dyn Transport>,
        )
    }

    #[tokio::test]
    async fn slow_transport_is_cut_off_with_timeout_error() {
        let executor = executor(
            TimeoutConfig::standard().request_timeout(Duration::from_millis(20)),
            Duration::from_millis(200),
        );
        let started = Instant::now();
        let error = executor
            .execute(&Context::background(), request(RequestOptions::default()))
            .await
            .expect_err("slow transport should exceed the budget");
        assert!(matches!(error, Error::Timeout { timeout_ms: 20, .. }));
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn fast_transport_passes_through() {
        let executor = executor(
            TimeoutConfig::standard().request_timeout(Duration::from_millis(200)),
            Duration::from_millis(5),
        );
        let response = executor
            .execute(&Context::background(), request(RequestOptions::default()))
            .await
            .expect("fast transport should finish inside the budget");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn per_call_override_tightens_the_budget() {
        let executor = executor(
            TimeoutConfig::standard().request_timeout(Duration::from_secs(5)),
            Duration::from_millis(200),
        );
        let error = executor
            .execute(
                &Context::background(),
                request(RequestOptions::new().timeout(Duration::from_millis(20))),
            )
            .await
            .expect_err("override should cut the call short");
        assert!(matches!(error, Error::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn disabled_timeout_lets_slow_calls_finish() {
        let executor = executor(
            TimeoutConfig::standard().request_timeout(Duration::from_millis(10)),
            Duration::from_millis(50),
        );
        let response = executor
            .execute(
                &Context::background(),
                request(RequestOptions::new().disable_timeout()),
            )
            .await
            .expect("disabled timeout should let the call finish");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tighter_parent_deadline_is_not_remapped() {
        let executor = executor(
            TimeoutConfig::standard().request_timeout(Duration::from_secs(5)),
            Duration::from_millis(200),
        );
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let error = executor
            .execute(&ctx, request(RequestOptions::default()))
            .await
            .expect_err("parent deadline should expire first");
        assert!(matches!(error, Error::DeadlineExceeded { .. }));
    }
}
