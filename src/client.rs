use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};

use crate::chain::{Executor, Policy};
use crate::context::Context;
use crate::policy::breaker::{CircuitBreakerConfig, CircuitBreakerPolicy};
use crate::policy::bulkhead::{BulkheadConfig, BulkheadPolicy};
use crate::policy::metrics::{MetricsCollector, MetricsPolicy};
use crate::policy::retry::{RetryConfig, RetryPolicy};
use crate::policy::timeout::{TimeoutConfig, TimeoutPolicy};
use crate::policy::trace::TracingPolicy;
use crate::request::{Request, RequestBody, RequestBuilder, RequestOptions};
use crate::response::Response;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};
use crate::util::{merge_headers, resolve_uri, validate_base_url};

/// A resilient HTTP client: a fixed policy chain composed around a
/// transport at construction time. Cloning is cheap and clones share the
/// same chain, per-host state and connection pool; the client is safe for
/// concurrent use.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    base_url: String,
    default_headers: HeaderMap,
    executor: Executor,
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url.into())
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    pub(crate) async fn execute_call(
        &self,
        ctx: &Context,
        method: Method,
        path: String,
        headers: HeaderMap,
        body: RequestBody,
        options: RequestOptions,
    ) -> crate::Result<Response> {
        let (uri_text, uri) = resolve_uri(&self.inner.base_url, &path)?;
        let headers = merge_headers(&self.inner.default_headers, &headers);
        let request = Request::new(method, uri, uri_text, headers, body, options);
        self.inner.executor.execute(ctx, request).await
    }
}

enum PolicySpec {
    Custom(Arc<dyn Policy>),
    CircuitBreaker(CircuitBreakerConfig),
    Retry(RetryConfig),
    Timeout(TimeoutConfig),
    Bulkhead(BulkheadConfig),
    Tracing,
    Metrics,
}

/// Builds a [`Client`] from named options.
///
/// Policies run in the order their options are applied, outermost first.
/// The canonical composition is tracing → metrics → bulkhead → circuit
/// breaker → retry → timeout, which bounds each retry attempt with the
/// timeout and keeps observability outermost.
pub struct ClientBuilder {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    transport_config: HttpTransportConfig,
    default_headers: HeaderMap,
    specs: Vec<PolicySpec>,
    collector: Option<Arc<MetricsCollector>>,
}

impl ClientBuilder {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            transport: None,
            transport_config: HttpTransportConfig::default(),
            default_headers: HeaderMap::new(),
            specs: Vec::new(),
            collector: None,
        }
    }

    /// Replace the default HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.transport_config.connect_timeout = connect_timeout;
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.transport_config.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.transport_config.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    /// Header applied to every request unless overridden per call.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Append an arbitrary policy at the current position in the chain.
    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.specs.push(PolicySpec::Custom(policy));
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.specs.push(PolicySpec::CircuitBreaker(config));
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.specs.push(PolicySpec::Retry(config));
        self
    }

    pub fn timeout(mut self, config: TimeoutConfig) -> Self {
        self.specs.push(PolicySpec::Timeout(config));
        self
    }

    pub fn bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.specs.push(PolicySpec::Bulkhead(config));
        self
    }

    /// Append a tracing policy backed by the global tracer provider.
    pub fn tracing(mut self) -> Self {
        self.specs.push(PolicySpec::Tracing);
        self
    }

    /// Append a metrics policy and share its collector with the resilience
    /// policies built by this builder.
    pub fn metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self.specs.push(PolicySpec::Metrics);
        self
    }

    pub fn build(self) -> crate::Result<Client> {
        validate_base_url(&self.base_url)?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(self.transport_config)));

        let mut policies: Vec<Arc<dyn Policy>> = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            let policy: Arc<dyn Policy> = match spec {
                PolicySpec::Custom(policy) => policy,
                PolicySpec::CircuitBreaker(config) => Arc::new(
                    CircuitBreakerPolicy::with_collector(config, self.collector.clone()),
                ),
                PolicySpec::Retry(config) => {
                    Arc::new(RetryPolicy::with_collector(config, self.collector.clone()))
                }
                PolicySpec::Timeout(config) => Arc::new(TimeoutPolicy::new(config)),
                PolicySpec::Bulkhead(config) => {
                    Arc::new(BulkheadPolicy::with_collector(config, self.collector.clone()))
                }
                PolicySpec::Tracing => Arc::new(TracingPolicy::new()),
                PolicySpec::Metrics => {
                    let Some(collector) = &self.collector else {
                        continue;
                    };
                    Arc::new(MetricsPolicy::new(Arc::clone(collector)))
                }
            };
            policies.push(policy);
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                default_headers: self.default_headers,
                executor: Executor::new(policies, transport),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use http::{HeaderMap, HeaderValue, Method, StatusCode, header};

    use super::Client;
    use crate::context::Context;
    use crate::error::Error;
    use crate::request::Request;
    use crate::response::Response;
    use crate::transport::Transport;

    struct EchoTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, _ctx: &Context, request: Request) -> crate::Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut headers = HeaderMap::new();
            headers.insert(
                "x-echo-uri",
                request.uri_text().parse().expect("uri should be a header value"),
            );
            headers.insert(
                "x-echo-method",
                request.method().as_str().parse().expect("method should be a header value"),
            );
            if let Some(value) = request.headers().get(header::USER_AGENT) {
                headers.insert(header::USER_AGENT, value.clone());
            }
            Ok(Response::new(StatusCode::OK, headers, ""))
        }
    }

    #[test]
    fn build_rejects_invalid_base_url() {
        let error = Client::builder("not a url")
            .build()
            .expect_err("base url without scheme should be rejected");
        assert!(matches!(error, Error::InvalidUri { .. }));
    }

    #[test]
    fn build_rejects_non_http_scheme() {
        let error = Client::builder("ftp://files.internal")
            .build()
            .expect_err("non-http scheme should be rejected");
        assert!(matches!(error, Error::InvalidUri { .. }));
    }

    #[tokio::test]
    async fn relative_paths_are_joined_onto_the_base_url() {
        let transport = Arc::new(EchoTransport {
            calls: AtomicUsize::new(0),
        });
        let client = Client::builder("http://orders.internal:8080/api")
            .transport(Arc::clone(&transport) as _)
            .build()
            .expect("client should build");

        let response = client
            .get("/v1/orders")
            .send(&Context::background())
            .await
            .expect("call should reach the echo transport");
        assert_eq!(
            response.header("x-echo-uri"),
            Some("http://orders.internal:8080/api/v1/orders")
        );
    }

    #[tokio::test]
    async fn default_headers_apply_unless_overridden() {
        let transport = Arc::new(EchoTransport {
            calls: AtomicUsize::new(0),
        });
        let client = Client::builder("http://orders.internal")
            .transport(Arc::clone(&transport) as _)
            .default_header(header::USER_AGENT, HeaderValue::from_static("meshx/0.1"))
            .build()
            .expect("client should build");

        let response = client
            .get("/v1/orders")
            .send(&Context::background())
            .await
            .expect("call should succeed");
        assert_eq!(
            response.headers().get(header::USER_AGENT),
            Some(&HeaderValue::from_static("meshx/0.1"))
        );

        let response = client
            .get("/v1/orders")
            .header(header::USER_AGENT, HeaderValue::from_static("custom/2"))
            .send(&Context::background())
            .await
            .expect("call should succeed");
        assert_eq!(
            response.headers().get(header::USER_AGENT),
            Some(&HeaderValue::from_static("custom/2"))
        );
    }

    #[tokio::test]
    async fn verb_helpers_use_the_expected_method() {
        let client = Client::builder("http://orders.internal")
            .transport(Arc::new(EchoTransport {
                calls: AtomicUsize::new(0),
            }) as _)
            .build()
            .expect("client should build");

        for (method, expected) in [
            (Method::GET, "GET"),
            (Method::POST, "POST"),
            (Method::PUT, "PUT"),
            (Method::PATCH, "PATCH"),
            (Method::DELETE, "DELETE"),
            (Method::HEAD, "HEAD"),
        ] {
            let response = client
                .request(method, "/v1/orders")
                .send(&Context::background())
                .await
                .expect("call should succeed");
            assert_eq!(response.header("x-echo-method"), Some(expected));
        }
    }
}
