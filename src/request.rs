use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;

use crate::client::Client;
use crate::context::Context;
use crate::error::Error;
use crate::response::Response;
use crate::util::{normalize_host, parse_header_name, parse_header_value};

pub(crate) type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type BodyStream = BoxBody<Bytes, BoxBodyError>;

/// A request body source.
///
/// Buffered bodies are rewindable: replaying an attempt is a cheap `Bytes`
/// clone. Streaming bodies are opaque and can only be sent once, which
/// disables retry for the call; they are never spooled into memory.
pub enum RequestBody {
    Empty,
    Buffered(Bytes),
    Streaming(BodyStream),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn buffered(body: impl Into<Bytes>) -> Self {
        Self::Buffered(body.into())
    }

    pub fn streaming<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
        E: StdError + Send + Sync + 'static,
    {
        Self::Streaming(BodyExt::boxed(StreamBody::new(stream.map(|item| {
            item.map(Frame::data)
                .map_err(|error| Box::new(error) as BoxBodyError)
        }))))
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Streaming(_))
    }

    pub(crate) fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Buffered(bytes) => Some(Self::Buffered(bytes.clone())),
            Self::Streaming(_) => None,
        }
    }

    fn map_infallible(never: std::convert::Infallible) -> BoxBodyError {
        match never {}
    }

    pub(crate) fn into_stream(self) -> BodyStream {
        match self {
            Self::Empty => Full::new(Bytes::new())
                .map_err(Self::map_infallible)
                .boxed(),
            Self::Buffered(bytes) => Full::new(bytes).map_err(Self::map_infallible).boxed(),
            Self::Streaming(body) => body,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("RequestBody::Empty"),
            Self::Buffered(bytes) => formatter
                .debug_tuple("RequestBody::Buffered")
                .field(&bytes.len())
                .finish(),
            Self::Streaming(_) => formatter.write_str("RequestBody::Streaming"),
        }
    }
}

/// Per-call overrides, computed once at call entry and carried on the
/// request through the whole chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    timeout: Option<Duration>,
    force_retry: bool,
    disable_circuit_breaker: bool,
    disable_retry: bool,
    disable_timeout: bool,
    disable_bulkhead: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry the call even when the method is non-idempotent.
    pub const fn force_retry(mut self) -> Self {
        self.force_retry = true;
        self
    }

    pub const fn disable_circuit_breaker(mut self) -> Self {
        self.disable_circuit_breaker = true;
        self
    }

    pub const fn disable_retry(mut self) -> Self {
        self.disable_retry = true;
        self
    }

    pub const fn disable_timeout(mut self) -> Self {
        self.disable_timeout = true;
        self
    }

    pub const fn disable_bulkhead(mut self) -> Self {
        self.disable_bulkhead = true;
        self
    }

    pub const fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub const fn force_retry_enabled(&self) -> bool {
        self.force_retry
    }

    pub const fn circuit_breaker_disabled(&self) -> bool {
        self.disable_circuit_breaker
    }

    pub const fn retry_disabled(&self) -> bool {
        self.disable_retry
    }

    pub const fn timeout_disabled(&self) -> bool {
        self.disable_timeout
    }

    pub const fn bulkhead_disabled(&self) -> bool {
        self.disable_bulkhead
    }
}

/// A prepared request flowing through the policy chain.
///
/// Immutable once the chain starts, except for header injection by the
/// tracing policy.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    uri_text: String,
    host: String,
    headers: HeaderMap,
    body: RequestBody,
    options: RequestOptions,
}

impl Request {
    pub fn new(
        method: Method,
        uri: Uri,
        uri_text: String,
        headers: HeaderMap,
        body: RequestBody,
        options: RequestOptions,
    ) -> Self {
        let host = normalize_host(&uri);
        Self {
            method,
            uri,
            uri_text,
            host,
            headers,
            body,
            options,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn uri_text(&self) -> &str {
        &self.uri_text
    }

    /// Normalized host key used for per-host state and metric labels.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Clone for a retry attempt. `None` when the body is streaming.
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            uri_text: self.uri_text.clone(),
            host: self.host.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            options: self.options,
        })
    }

    pub(crate) fn into_parts(self) -> (Method, Uri, HeaderMap, RequestBody) {
        (self.method, self.uri, self.headers, self.body)
    }
}

/// Builder returned by the client's verb helpers.
pub struct RequestBuilder<'a> {
    client: &'a Client,
    method: Method,
    path: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
    options: RequestOptions,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_pairs.extend(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    /// An opaque streaming body. Disables retry for this call.
    pub fn body_stream<S, E>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
        E: StdError + Send + Sync + 'static,
    {
        self.body = RequestBody::streaming(stream);
        self
    }

    pub fn json<T>(self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body =
            serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        let with_body = self.body(Bytes::from(body));
        Ok(with_body.header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.timeout(timeout);
        self
    }

    /// Override the idempotency gate for this call.
    pub fn force_retry(mut self) -> Self {
        self.options = self.options.force_retry();
        self
    }

    pub fn no_circuit_breaker(mut self) -> Self {
        self.options = self.options.disable_circuit_breaker();
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.options = self.options.disable_retry();
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.options = self.options.disable_timeout();
        self
    }

    pub fn no_bulkhead(mut self) -> Self {
        self.options = self.options.disable_bulkhead();
        self
    }

    pub async fn send(self, ctx: &Context) -> crate::Result<Response> {
        let path = append_query_pairs(&self.path, &self.query_pairs);
        self.client
            .execute_call(ctx, self.method, path, self.headers, self.body, self.options)
            .await
    }
}

fn append_query_pairs(path: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return path.to_owned();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
    let appended = serializer.finish();

    match path.split_once('?') {
        Some((base, existing)) if !existing.is_empty() => format!("{base}?{existing}&{appended}"),
        Some((base, _)) => format!("{base}?{appended}"),
        None => format!("{path}?{appended}"),
    }
}
