use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use opentelemetry::Context as OtelContext;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::Injector;
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;

use crate::chain::{Next, Policy};
use crate::context::Context;
use crate::request::Request;
use crate::response::Response;

const TRACER_NAME: &str = "meshx";

/// Wraps each call in a client span and injects W3C trace context headers
/// into the outgoing request. Observes and forwards; never alters control
/// flow or swallows errors.
pub struct TracingPolicy {
    tracer: BoxedTracer,
}

impl TracingPolicy {
    /// Uses the process-global tracer and text-map propagator; the
    /// application is responsible for installing an SDK behind them.
    pub fn new() -> Self {
        Self {
            tracer: global::tracer(TRACER_NAME),
        }
    }
}

impl Default for TracingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                self.0.insert(name, header_value);
            }
        }
    }
}

fn request_span_attributes(method: &Method, uri: &Uri) -> Vec<KeyValue> {
    let mut attributes = Vec::with_capacity(6);
    attributes.push(KeyValue::new(
        "http.request.method",
        method.as_str().to_owned(),
    ));
    attributes.push(KeyValue::new("url.full", uri.to_string()));
    if let Some(scheme) = uri.scheme_str() {
        attributes.push(KeyValue::new("url.scheme", scheme.to_owned()));
    }
    if let Some(host) = uri.host() {
        attributes.push(KeyValue::new("server.address", host.to_owned()));
    }
    attributes.push(KeyValue::new("url.path", uri.path().to_owned()));
    if let Some(query) = uri.query() {
        if !query.is_empty() {
            attributes.push(KeyValue::new("url.query", query.to_owned()));
        }
    }
    attributes
}

#[async_trait]
impl Policy for TracingPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        mut request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        let mut span = self
            .tracer
            .span_builder(request.method().as_str().to_owned())
            .with_kind(SpanKind::Client)
            .start(&self.tracer);
        for attribute in request_span_attributes(request.method(), request.uri()) {
            span.set_attribute(attribute);
        }

        let otel_ctx = OtelContext::current_with_span(span);
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&otel_ctx, &mut HeaderInjector(request.headers_mut()));
        });

        let outcome = next.run(ctx, request).await;

        let span = otel_ctx.span();
        match &outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                span.set_attribute(KeyValue::new(
                    "http.response.status_code",
                    i64::from(status),
                ));
                if status >= 400 {
                    span.set_status(Status::error(format!("HTTP {status}")));
                } else {
                    span.set_status(Status::Ok);
                }
            }
            Err(error) => {
                span.set_attribute(KeyValue::new("error.type", error.code().as_str()));
                span.set_status(Status::error(error.to_string()));
            }
        }
        span.end();

        outcome
    }
}
