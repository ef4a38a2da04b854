//! The boundary between the governor and the network.
//!
//! The governor never opens sockets itself; it hands a fully-resolved
//! [`TransportRequest`] to whatever [`Transport`] it was built with. The
//! production implementation is [`ReqwestTransport`], tests plug in their own.

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// A request with an absolute URL and final headers.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Whatever came back, whatever the status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// A failure below the HTTP layer: DNS, refused connection, reset, timeout.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportFailure(pub String);

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

// ---------------------------------------------------------------------------
// reqwest
// ---------------------------------------------------------------------------

#[cfg(feature = "io")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "io")]
mod reqwest_transport {
    use super::*;
    use std::time::Duration;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// [`Transport`] backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, TransportFailure> {
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| TransportFailure::new(e.to_string()))?;
            Ok(Self { client })
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportFailure> {
            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| TransportFailure::new(e.to_string()))?;

            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp
                .bytes()
                .await
                .map_err(|e| TransportFailure::new(e.to_string()))?;

            Ok(TransportResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Test helper
// ---------------------------------------------------------------------------
