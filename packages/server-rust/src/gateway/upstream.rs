//! Forwarding of a rewritten request to the chosen backend.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::header::{self, HeaderMap, HeaderName};
use http::{Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("request body rejected: {0}")]
    Body(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Sends a request whose URI is the absolute backend target.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

/// Headers that describe a single connection and must not be forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        header::CONNECTION,
        header::HOST,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::TE,
        header::TRAILER,
        header::UPGRADE,
        header::PROXY_AUTHORIZATION,
        header::PROXY_AUTHENTICATE,
    ]
    .contains(name)
        || name.as_str().eq_ignore_ascii_case("keep-alive")
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// `reqwest`-backed upstream. Bodies are buffered up to `body_limit` bytes.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    body_limit: usize,
}

impl HttpUpstream {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration, body_limit: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, body_limit })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?;

        let mut outbound = HeaderMap::new();
        copy_end_to_end(&parts.headers, &mut outbound);

        let upstream = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(outbound)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        copy_end_to_end(&headers, response.headers_mut());
        Ok(response)
    }
}
