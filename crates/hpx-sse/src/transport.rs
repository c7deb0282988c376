//! Streaming HTTP transport abstraction.
//!
//! The manager never talks to the network directly: it asks a [`Transport`]
//! to open a stream and then consumes the returned body chunk by chunk.
//! [`HttpTransport`] is the default implementation on top of `reqwest`;
//! tests and embedders can plug in their own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use tracing::debug;

use crate::error::{SseError, SseResult};

/// Everything needed to open one SSE stream.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Endpoint URL.
    pub url: String,
    /// Request headers, always including `Accept: text/event-stream` and
    /// `Cache-Control: no-cache`.
    pub headers: http::HeaderMap,
    /// Deadline for receiving the response head. The body is unbounded.
    pub connect_timeout: Duration,
}

impl StreamRequest {
    /// Create a request with the standard SSE headers.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );
        Self {
            url: url.into(),
            headers,
            connect_timeout,
        }
    }

    /// Add extra headers. The standard SSE headers cannot be overridden.
    #[must_use]
    pub fn with_headers(mut self, extra: &http::HeaderMap) -> Self {
        for (name, value) in extra {
            if name == http::header::ACCEPT || name == http::header::CACHE_CONTROL {
                continue;
            }
            self.headers.append(name.clone(), value.clone());
        }
        self
    }
}

/// An opened stream: the response status and its body chunks.
pub struct TransportResponse {
    /// HTTP status code of the response.
    pub status: u16,
    /// Body chunks as they arrive. Ends when the server closes the stream.
    pub body: BoxStream<'static, SseResult<Bytes>>,
}

impl TransportResponse {
    /// Wrap a status and a body stream.
    pub fn new<S>(status: u16, body: S) -> Self
    where
        S: Stream<Item = SseResult<Bytes>> + Send + 'static,
    {
        Self {
            status,
            body: body.boxed(),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens streaming GET requests.
///
/// Each call must produce a fresh stream; the manager drops the previous
/// [`TransportResponse`] to cancel it and never reuses it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a stream. Resolves once the response head has been received.
    async fn open(&self, request: StreamRequest) -> SseResult<TransportResponse>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> SseResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SseError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: StreamRequest) -> SseResult<TransportResponse> {
        debug!(url = %request.url, "Opening SSE stream");

        let connect_timeout = request.connect_timeout;
        let resp = self
            .client
            .get(&request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SseError::timeout(connect_timeout)
                } else {
                    SseError::from(e)
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp.bytes_stream().map(|chunk| chunk.map_err(SseError::from));
        Ok(TransportResponse::new(status, body))
    }
}
