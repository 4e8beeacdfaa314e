//! HTTP transport seam.
//!
//! The core never talks to the network directly: it hands a fully signed
//! [`TransportRequest`] to a [`Transport`] and inspects the status of the
//! returned [`TransportResponse`].  [`HttpTransport`] is the production
//! implementation on top of `reqwest`; tests substitute a scripted one.

use bytes::Bytes;
use http::{Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A request as it goes on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Target URI without scheme.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as received from the service.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

/// Sends a request and returns the raw response.
///
/// Implementations report only failures that prevented a response
/// (connection, TLS, timeout); every received status is returned as `Ok`.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransportResponse>> + Send + '_>>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpTransport {
    /// Build an HTTPS transport with the given request timeout.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = format!("{}://{}", self.scheme, request.uri);
            let mut builder = self.client.request(request.method, &url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let resp = builder
                .body(request.body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("request to {} failed: {}", url, e))?;

            let status = resp.status();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let body = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("reading response body from {} failed: {}", url, e))?;

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        })
    }
}
