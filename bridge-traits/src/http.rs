//! HTTP Client Abstraction
//!
//! Provides async HTTP operations, including streamed range downloads used to
//! feed partially downloaded audio files.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Request everything from `offset` to the end of the resource.
    ///
    /// An offset of zero leaves the request unranged.
    pub fn range_from(self, offset: u64) -> Self {
        if offset == 0 {
            self
        } else {
            self.header("Range", format!("bytes={}-", offset))
        }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Buffered HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Chunked response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Streaming HTTP response.
///
/// Headers are available as soon as the server answers; the body is delivered
/// chunk by chunk as it arrives.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Length of the body of *this* response, not of the whole resource.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl HttpStreamResponse {
    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `206 Partial Content`: the body continues a previous download.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

impl fmt::Debug for HttpStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Async HTTP client trait
///
/// Implementations own connection pooling, TLS and resource-level timeouts.
/// The playback core does not retry at the transport level; it applies its own
/// per-track retry budget on top of this trait.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
/// use futures::StreamExt;
///
/// async fn resume(client: &dyn HttpClient, url: &str, offset: u64) -> Result<()> {
///     let mut response = client
///         .execute_stream(HttpRequest::get(url).range_from(offset))
///         .await?;
///     while let Some(chunk) = response.body.next().await {
///         let _bytes = chunk?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request and buffer the whole body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute a request and return the body as a stream of chunks.
    ///
    /// Non-2xx statuses are returned as `BridgeError::HttpStatus`.
    async fn execute_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse>;
}
