//! Generic HTTP client used by the polling transport.
//!
//! This abstracts over the HTTP client implementation so the polling
//! transport only sees method, URL, headers and body. [`ReqwestHttpClient`]
//! is the default implementation.

use core::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use thiserror::Error;

/// The two methods the polling protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET` (CONNECT and POLLING).
    Get,

    /// `POST` (SEND).
    Post,
}

/// A minimal async HTTP client.
///
/// Implementations handle the mechanics (TLS, connection pooling, etc.)
/// while this trait exposes only what the polling transport needs.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// The error type for HTTP operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a request and return the full response.
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> BoxFuture<'_, Result<HttpResponse, Self::Error>>;
}

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body bytes.
    pub body: Vec<u8>,

    /// Response headers (lowercase keys).
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// Look up a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }
}

/// Error type for the reqwest-based HTTP client.
#[derive(Debug, Error)]
#[error("HTTP request failed: {0}")]
pub struct ReqwestHttpError(#[from] reqwest::Error);

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new reqwest-backed HTTP client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Bound every request, POLLING included, by `timeout`.
    ///
    /// Pick a value above the server's poll window: an idle POLLING request
    /// is held open for the whole window, and a timeout ends the poll loop.
    ///
    /// # Errors
    ///
    /// Returns a [`ReqwestHttpError`] if the TLS backend cannot be set up.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ReqwestHttpError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    type Error = ReqwestHttpError;

    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> BoxFuture<'_, Result<HttpResponse, Self::Error>> {
        let mut builder = match method {
            HttpMethod::Get => self.inner.get(url),
            HttpMethod::Post => self.inner.post(url).body(body),
        };
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }

        async move {
            let resp = builder.send().await?;
            let status = resp.status().as_u16();

            let resp_headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();

            let body = resp.bytes().await?.to_vec();

            Ok(HttpResponse {
                status,
                body,
                headers: resp_headers,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            body: Vec::new(),
            headers: vec![("content-type".into(), "text/plain".into())],
        };

        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
        assert_eq!(resp.header("x-missing"), None);
    }
}
