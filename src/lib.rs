//! `meshx` is a resilient HTTP client for service-to-service calls inside a
//! microservice fleet.
//!
//! Every call runs through a chain of resilience policies composed around a
//! pluggable transport: circuit breaker, retry with backoff, timeout and
//! bulkhead, plus tracing and metrics adapters that observe without
//! touching control flow. The chain is fixed when the client is built; the
//! client is cheap to clone and safe to share.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use meshx::{
//!     BulkheadConfig, CircuitBreakerConfig, Client, ConstantBackoff, Context, RetryConfig,
//!     TimeoutConfig,
//! };
//!
//! # async fn demo() -> Result<(), meshx::Error> {
//! let client = Client::builder("http://orders.internal:8080")
//!     .bulkhead(BulkheadConfig::standard().max_concurrent(64))
//!     .circuit_breaker(
//!         CircuitBreakerConfig::standard()
//!             .error_threshold(50)
//!             .min_requests(10)
//!             .sleep_window(Duration::from_secs(5)),
//!     )
//!     .retry(
//!         RetryConfig::standard()
//!             .max_attempts(3)
//!             .backoff(Arc::new(ConstantBackoff::new(Duration::from_millis(100)))),
//!     )
//!     .timeout(TimeoutConfig::standard().request_timeout(Duration::from_secs(2)))
//!     .build()?;
//!
//! let response = client
//!     .get("/v1/orders/42")
//!     .send(&Context::background())
//!     .await?;
//! println!("status={}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Composition order
//!
//! Policies run in the order their builder options are applied, outermost
//! first. The canonical order is tracing → metrics → bulkhead → circuit
//! breaker → retry → timeout → transport, which bounds each retry attempt
//! with the timeout and keeps observability outermost. Any status code on
//! the wire is a successful call; errors are reserved for the wire itself
//! and for the policies' own verdicts.

mod backoff;
mod chain;
mod client;
mod context;
mod error;
mod policy;
mod request;
mod response;
mod transport;
mod util;

pub use crate::backoff::{Backoff, ConstantBackoff, ExponentialBackoff, LinearBackoff};
pub use crate::chain::{Next, Policy};
pub use crate::client::{Client, ClientBuilder};
pub use crate::context::{Context, SleepOutcome};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::policy::breaker::{
    CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState, TripClassifier,
};
pub use crate::policy::bulkhead::{BulkheadConfig, BulkheadPolicy};
pub use crate::policy::metrics::{MetricsCollector, MetricsPolicy};
pub use crate::policy::retry::{RetryClassifier, RetryConfig, RetryDecision, RetryPolicy};
pub use crate::policy::timeout::{TimeoutConfig, TimeoutPolicy};
pub use crate::policy::trace::TracingPolicy;
pub use crate::request::{Request, RequestBody, RequestBuilder, RequestOptions};
pub use crate::response::{Response, ResponseBody};
pub use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Backoff, BulkheadConfig, CircuitBreakerConfig, CircuitState, Client, ConstantBackoff,
        Context, Error, ErrorCode, ExponentialBackoff, LinearBackoff, MetricsCollector,
        RetryConfig, Response, TimeoutConfig, Transport,
    };
}

#[cfg(test)]
mod tests;
