use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::request::BoxBodyError;

/// Body stream handed to the caller. Response bodies are not required to
/// be `Sync`; they are still `Send` and safe to hold across awaits.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxBodyError>;

/// An HTTP response with a streaming body.
///
/// The caller owns the body after a successful return and is responsible
/// for consuming or draining it, whatever the status class.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    /// A buffered response, mainly for test transports.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        fn map_infallible(never: std::convert::Infallible) -> BoxBodyError {
            match never {}
        }
        Self {
            status,
            headers,
            body: Full::new(body.into()).map_err(map_infallible).boxed_unsync(),
        }
    }

    pub fn from_stream(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Collect the remaining body into memory.
    pub async fn bytes(self) -> crate::Result<Bytes> {
        self.body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|source| Error::ReadBody { source })
    }

    pub async fn text(self) -> crate::Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Deserialize {
            source,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Discard the remaining body frames, keeping the connection reusable.
    pub async fn drain(mut self) {
        while let Some(frame) = self.body.frame().await {
            if frame.is_err() {
                break;
            }
        }
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
