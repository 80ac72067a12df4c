use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Sub-classification of a network failure, derived from the transport's
/// underlying cause chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable classification carried by every [`Error`].
///
/// The executor path produces `InvalidRequest`, `Network`, `Timeout`,
/// `Canceled`, `CircuitOpen`, `BulkheadFull` and `MaxRetriesExceeded`;
/// `Serialize`/`Deserialize` belong to the body-codec convenience surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidRequest,
    Network,
    Timeout,
    Canceled,
    CircuitOpen,
    BulkheadFull,
    MaxRetriesExceeded,
    Serialize,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::CircuitOpen => "circuit_open",
            Self::BulkheadFull => "bulkhead_full",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Serialize => "serialize",
            Self::Deserialize => "deserialize",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Network {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("request deadline exceeded for {method} {uri}")]
    DeadlineExceeded { method: Method, uri: String },
    #[error("request canceled for {method} {uri}")]
    Canceled { method: Method, uri: String },
    #[error("circuit breaker is open for {host} ({open_ms}ms since transition) on {method} {uri}")]
    CircuitOpen {
        host: String,
        open_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("bulkhead capacity exhausted for {host} on {method} {uri}")]
    BulkheadFull {
        host: String,
        method: Method,
        uri: String,
    },
    #[error("max retry attempts ({attempts}) exceeded for {method} {uri}: {source}")]
    MaxRetriesExceeded {
        attempts: usize,
        method: Method,
        uri: String,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. }
            | Self::InvalidHeaderName { .. }
            | Self::InvalidHeaderValue { .. }
            | Self::RequestBuild { .. } => ErrorCode::InvalidRequest,
            Self::Network { .. } | Self::ReadBody { .. } => ErrorCode::Network,
            Self::Timeout { .. } | Self::DeadlineExceeded { .. } => ErrorCode::Timeout,
            Self::Canceled { .. } => ErrorCode::Canceled,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::BulkheadFull { .. } => ErrorCode::BulkheadFull,
            Self::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded,
            Self::Serialize { .. } => ErrorCode::Serialize,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    /// Whether the failure happened on the wire rather than in a policy.
    pub const fn is_network(&self) -> bool {
        matches!(self.code(), ErrorCode::Network)
    }
}
