use std::time::Duration;

use async_trait::async_trait;
use http::Request as HttpRequest;
use http_body_util::BodyExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as PooledClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::context::{Context, deadline_wait};
use crate::error::Error;
use crate::request::{BodyStream, BoxBodyError, Request};
use crate::response::Response;
use crate::util::classify_transport_error;

/// One HTTP exchange under an externally imposed deadline.
///
/// A 5xx status is a successful exchange with a failing status, not an
/// error; errors are reserved for the wire (DNS, connect, TLS, reset) and
/// for context cancellation or expiry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, ctx: &Context, request: Request) -> crate::Result<Response>;
}

/// Connection pool knobs for the production transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
        }
    }
}

/// Production transport: pooled hyper client over plain TCP or rustls TLS,
/// HTTP/1.1 and HTTP/2.
pub struct HttpTransport {
    client: PooledClient<HttpsConnector<HttpConnector>, BodyStream>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.enforce_http(false);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);

        let client = PooledClient::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(https);

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpTransportConfig::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, ctx: &Context, request: Request) -> crate::Result<Response> {
        let method = request.method().clone();
        let uri_text = request.uri_text().to_owned();

        if ctx.is_cancelled() {
            return Err(Error::Canceled {
                method,
                uri: uri_text,
            });
        }
        if ctx.is_expired() {
            return Err(Error::DeadlineExceeded {
                method,
                uri: uri_text,
            });
        }

        let http_request = into_http_request(request)?;
        let response = tokio::select! {
            result = self.client.request(http_request) => {
                result.map_err(|source| {
                    let kind = classify_transport_error(&source);
                    debug!(kind = %kind, method = %method, "transport exchange failed");
                    Error::Network {
                        kind,
                        method: method.clone(),
                        uri: uri_text.clone(),
                        source: Box::new(source),
                    }
                })?
            }
            _ = ctx.cancelled() => {
                return Err(Error::Canceled { method, uri: uri_text });
            }
            _ = deadline_wait(ctx.deadline()) => {
                return Err(Error::DeadlineExceeded { method, uri: uri_text });
            }
        };

        let (parts, body) = response.into_parts();
        let body = body
            .map_err(|source| Box::new(source) as BoxBodyError)
            .boxed_unsync();
        Ok(Response::from_stream(parts.status, parts.headers, body))
    }
}

fn into_http_request(request: Request) -> crate::Result<HttpRequest<BodyStream>> {
    let (method, uri, headers, body) = request.into_parts();
    let mut builder = HttpRequest::builder().method(method).uri(uri);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    builder
        .body(body.into_stream())
        .map_err(|source| Error::RequestBuild { source })
}
