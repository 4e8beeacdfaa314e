//! Blob service client.
//!
//! [`BlobClient`] binds a validated [`CredentialSet`] to a [`Transport`] and
//! provides the request plumbing shared by every operation: URI assembly,
//! the per-request `x-ms-*` headers, signing, sending and status checks.
//! The existence probe and unique-name resolution live here; block upload
//! and commit are in [`crate::upload`].

use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::auth::{self, AZURE_API_VERSION};
use crate::config::Config;
use crate::credentials::CredentialSet;
use crate::errors::{generate_request_id, BlobError};
use crate::metrics;
use crate::request::{RequestBuilder, RequestDescriptor};
use crate::transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
use crate::xml::parse_error_code;

/// Upper bound on names probed by [`BlobClient::resolve_unique_name`].
pub const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Default blob service domain.
pub const DEFAULT_BLOB_DOMAIN: &str = "blob.core.windows.net";

/// Percent-encoding set for blob names: encode everything except
/// unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encoding set for query values: block ids may carry `+`, `/`, `=`.
const AZURE_QUERY_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Client for one storage account container.
///
/// Cheap to clone: credentials and transport are shared behind `Arc`, so
/// concurrent uploads reuse them without locking.
#[derive(Clone)]
pub struct BlobClient {
    credentials: Arc<CredentialSet>,
    transport: Arc<dyn Transport>,
    blob_domain: String,
    cname: String,
    default_cache_control: Option<String>,
    concurrency: usize,
}

/// A response together with the request id that produced it.
pub(crate) struct Exchange {
    pub operation: &'static str,
    pub request_id: String,
    pub response: TransportResponse,
}

impl Exchange {
    /// Accept the response only if its status is `expected`.
    pub fn expect_status(self, expected: StatusCode) -> Result<TransportResponse, BlobError> {
        if self.response.status == expected {
            Ok(self.response)
        } else {
            Err(self.into_unexpected())
        }
    }

    /// Convert into a protocol error carrying status and request id.
    pub fn into_unexpected(self) -> BlobError {
        let body = String::from_utf8_lossy(&self.response.body).into_owned();
        let code = parse_error_code(&self.response.body).unwrap_or_default();
        warn!(
            "{} returned HTTP {} code='{}' request_id={}",
            self.operation, self.response.status, code, self.request_id
        );
        BlobError::UnexpectedStatus {
            operation: self.operation,
            status: self.response.status,
            request_id: self.request_id,
            body,
        }
    }
}

impl BlobClient {
    /// Create a client with default settings over the given transport.
    pub fn new(credentials: CredentialSet, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials: Arc::new(credentials),
            transport,
            blob_domain: DEFAULT_BLOB_DOMAIN.to_string(),
            cname: String::new(),
            default_cache_control: None,
            concurrency: 1,
        }
    }

    /// Build a client from configuration with the `reqwest` transport.
    ///
    /// Credentials are validated before the transport is created.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let credentials = CredentialSet::from_config(&config.azure)?;
        let transport = HttpTransport::new(Duration::from_secs(config.upload.timeout_seconds))?;
        Ok(Self::with_transport_from_config(
            config,
            credentials,
            Arc::new(transport),
        ))
    }

    /// Build a client from configuration over an explicit transport.
    pub fn with_transport_from_config(
        config: &Config,
        credentials: CredentialSet,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(credentials, transport)
            .with_blob_domain(&config.azure.blob_domain)
            .with_cname(&config.azure.cname)
            .with_cache_max_age(config.azure.cache_max_age)
            .with_concurrency(config.upload.concurrency)
    }

    pub fn with_blob_domain(mut self, domain: &str) -> Self {
        if !domain.is_empty() {
            self.blob_domain = domain.trim_matches('.').to_string();
        }
        self
    }

    /// Use `cname` as the host of public blob URLs.
    pub fn with_cname(mut self, cname: &str) -> Self {
        self.cname = cname.trim_end_matches('/').to_string();
        self
    }

    /// Cache-Control applied to uploads that do not specify one.
    pub fn with_cache_max_age(mut self, seconds: u64) -> Self {
        self.default_cache_control = (seconds > 0).then(|| format!("max-age={seconds}"));
        self
    }

    /// Maximum number of Put Block requests in flight (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn default_cache_control(&self) -> Option<&str> {
        self.default_cache_control.as_deref()
    }

    // -- URIs -----------------------------------------------------------------

    fn service_host(&self) -> String {
        format!("{}.{}", self.credentials.account(), self.blob_domain)
    }

    /// Scheme-less request URI for `blob_name` with `query` parameters in order.
    pub fn blob_uri(&self, blob_name: &str, query: &[(&str, &str)]) -> String {
        let encoded = percent_encoding::utf8_percent_encode(blob_name, &AZURE_BLOB_ENCODE_SET);
        let mut uri = format!(
            "{}/{}/{}",
            self.service_host(),
            self.credentials.container(),
            encoded
        );
        if !query.is_empty() {
            let joined = query
                .iter()
                .map(|(k, v)| {
                    let v = percent_encoding::utf8_percent_encode(v, &AZURE_QUERY_ENCODE_SET);
                    format!("{k}={v}")
                })
                .collect::<Vec<_>>()
                .join("&");
            uri.push('?');
            uri.push_str(&joined);
        }
        uri
    }

    /// Public HTTPS URL of `blob_name`, using the custom domain when set.
    pub fn blob_url(&self, blob_name: &str) -> String {
        let host = if self.cname.is_empty() {
            self.service_host()
        } else {
            self.cname
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string()
        };
        let encoded = percent_encoding::utf8_percent_encode(blob_name, &AZURE_BLOB_ENCODE_SET);
        format!(
            "https://{}/{}/{}",
            host,
            self.credentials.container(),
            encoded
        )
    }

    // -- Request plumbing -----------------------------------------------------

    /// Start a request carrying the headers every signed request needs:
    /// `x-ms-date`, `x-ms-version` and a fresh `x-ms-client-request-id`.
    pub(crate) fn request(&self, method: Method, uri: String) -> RequestBuilder {
        RequestDescriptor::builder(method, uri)
            .header("x-ms-date", httpdate::fmt_http_date(SystemTime::now()))
            .header("x-ms-version", AZURE_API_VERSION)
            .header("x-ms-client-request-id", generate_request_id())
    }

    /// Sign `request`, send it with `body` and return the raw exchange.
    ///
    /// Transport failures are wrapped with the request id; the status is not
    /// inspected here.
    pub(crate) async fn execute(
        &self,
        operation: &'static str,
        request: RequestDescriptor,
        body: Bytes,
    ) -> Result<Exchange, BlobError> {
        let request_id = request
            .extension_headers()
            .get("x-ms-client-request-id")
            .cloned()
            .unwrap_or_default();

        let authorization = auth::sign(&request, &self.credentials)?;
        let mut headers = request.wire_headers();
        headers.push(("Authorization".to_string(), authorization));

        debug!(
            "{} {} {} request_id={}",
            operation,
            request.method(),
            request.uri(),
            request_id
        );

        let response = self
            .transport
            .send(TransportRequest {
                method: request.method().clone(),
                uri: request.uri().to_string(),
                headers,
                body,
            })
            .await
            .map_err(|source| BlobError::Transport {
                operation,
                request_id: request_id.clone(),
                source,
            })?;

        metrics::record_request(operation, response.status);

        Ok(Exchange {
            operation,
            request_id,
            response,
        })
    }

    // -- Existence and naming -------------------------------------------------

    /// Check whether `blob_name` exists with a metadata probe.
    ///
    /// 200 means present and 404 absent; any other status is an error,
    /// never a silent "absent".
    pub async fn blob_exists(&self, blob_name: &str) -> Result<bool, BlobError> {
        let uri = self.blob_uri(blob_name, &[("comp", "metadata")]);
        let request = self.request(Method::GET, uri).build();
        let exchange = self.execute("get_metadata", request, Bytes::new()).await?;

        match exchange.response.status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(exchange.into_unexpected()),
        }
    }

    /// Find a blob name that does not exist yet.
    ///
    /// Probes `name`, then `name1`, `name2`, ... with the counter placed
    /// before the extension (`photo.jpg` -> `photo1.jpg`).
    pub async fn resolve_unique_name(&self, blob_name: &str) -> Result<String, BlobError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = numbered_name(blob_name, attempt);
            if !self.blob_exists(&candidate).await? {
                debug!("resolved unique name {} -> {}", blob_name, candidate);
                return Ok(candidate);
            }
        }
        Err(BlobError::NameExhausted {
            name: blob_name.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

/// `name` with `counter` inserted before the extension; counter 0 is `name`.
///
/// Only the final path segment is considered, and a leading dot does not
/// start an extension (`.env` -> `.env1`).
pub fn numbered_name(name: &str, counter: u32) -> String {
    if counter == 0 {
        return name.to_string();
    }
    let segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let split = segment_start + dot;
            format!("{}{}{}", &name[..split], counter, &name[split..])
        }
        _ => format!("{name}{counter}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    struct StaticTransport(StatusCode);

    impl Transport for StaticTransport {
        fn send(
            &self,
            _request: TransportRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransportResponse>> + Send + '_>> {
            let status = self.0;
            Box::pin(async move { Ok(TransportResponse::new(status)) })
        }
    }

    fn client() -> BlobClient {
        let creds = CredentialSet::new("testacct", "dGVzdGtleQ==", "media", 1024).unwrap();
        BlobClient::new(creds, Arc::new(StaticTransport(StatusCode::OK)))
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("photo.jpg", 0), "photo.jpg");
        assert_eq!(numbered_name("photo.jpg", 1), "photo1.jpg");
        assert_eq!(numbered_name("photo.tar.gz", 2), "photo.tar2.gz");
        assert_eq!(numbered_name("README", 3), "README3");
        assert_eq!(numbered_name(".env", 1), ".env1");
        assert_eq!(numbered_name("2024/01/photo.jpg", 4), "2024/01/photo4.jpg");
        assert_eq!(numbered_name("v1.0/readme", 1), "v1.0/readme1");
    }

    #[test]
    fn test_blob_uri() {
        let c = client();
        assert_eq!(
            c.blob_uri("a b/c.jpg", &[]),
            "testacct.blob.core.windows.net/media/a%20b/c.jpg"
        );
        assert_eq!(
            c.blob_uri("c.jpg", &[("comp", "block"), ("blockid", "QUJD")]),
            "testacct.blob.core.windows.net/media/c.jpg?comp=block&blockid=QUJD"
        );
        assert_eq!(
            c.blob_uri("c.jpg", &[("comp", "block"), ("blockid", "a+b/c=")]),
            "testacct.blob.core.windows.net/media/c.jpg?comp=block&blockid=a%2Bb%2Fc%3D"
        );
    }

    #[test]
    fn test_blob_url_with_and_without_cname() {
        let c = client();
        assert_eq!(
            c.blob_url("x.png"),
            "https://testacct.blob.core.windows.net/media/x.png"
        );
        let c = c.with_cname("https://cdn.example.com/");
        assert_eq!(c.blob_url("x.png"), "https://cdn.example.com/media/x.png");
    }

    #[test]
    fn test_custom_blob_domain() {
        let c = client().with_blob_domain("blob.core.chinacloudapi.cn");
        assert!(c
            .blob_uri("x", &[])
            .starts_with("testacct.blob.core.chinacloudapi.cn/media/"));
    }

    #[test]
    fn test_cache_max_age_default() {
        assert_eq!(client().default_cache_control(), None);
        assert_eq!(
            client().with_cache_max_age(60).default_cache_control(),
            Some("max-age=60")
        );
    }

    #[test]
    fn test_request_carries_required_headers() {
        let req = client()
            .request(Method::GET, "testacct.blob.core.windows.net/media/x".to_string())
            .build();
        let ext = req.extension_headers();
        assert!(ext.contains_key("x-ms-date"));
        assert_eq!(ext.get("x-ms-version").map(String::as_str), Some(AZURE_API_VERSION));
        assert_eq!(ext.get("x-ms-client-request-id").map(String::len), Some(32));
    }

    #[test]
    fn test_request_ids_are_fresh() {
        let c = client();
        let a = c.request(Method::GET, "testacct.blob.core.windows.net/media/x".into()).build();
        let b = c.request(Method::GET, "testacct.blob.core.windows.net/media/x".into()).build();
        assert_ne!(
            a.extension_headers().get("x-ms-client-request-id"),
            b.extension_headers().get("x-ms-client-request-id")
        );
    }

    #[tokio::test]
    async fn test_blob_exists_status_mapping() {
        let creds = CredentialSet::new("testacct", "dGVzdGtleQ==", "media", 1024).unwrap();
        let present = BlobClient::new(creds.clone(), Arc::new(StaticTransport(StatusCode::OK)));
        assert!(present.blob_exists("a.jpg").await.unwrap());

        let absent = BlobClient::new(creds.clone(), Arc::new(StaticTransport(StatusCode::NOT_FOUND)));
        assert!(!absent.blob_exists("a.jpg").await.unwrap());

        let failing = BlobClient::new(
            creds.clone(),
            Arc::new(StaticTransport(StatusCode::INTERNAL_SERVER_ERROR)),
        );
        let err = failing.blob_exists("a.jpg").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(err.request_id().is_some());

        let broken = BlobClient::new(creds, Arc::new(StaticTransport(StatusCode::FORBIDDEN)));
        let err = broken.blob_exists("a.jpg").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(err.request_id().is_some());
    }

    #[tokio::test]
    async fn test_resolve_unique_name_skips_existing() {
        use crate::testing::{test_client, ScriptedTransport};

        let transport = ScriptedTransport::new(|req| {
            if req.uri.contains("/photo.jpg?") || req.uri.contains("/photo1.jpg?") {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            }
        });
        let c = test_client(1024, transport.clone());
        assert_eq!(c.resolve_unique_name("photo.jpg").await.unwrap(), "photo2.jpg");
        assert_eq!(transport.requests().len(), 3);
        assert!(transport.requests()[0].uri.ends_with("/media/photo.jpg?comp=metadata"));
    }

    #[tokio::test]
    async fn test_resolve_unique_name_free_on_first_probe() {
        use crate::testing::{test_client, ScriptedTransport};

        let transport = ScriptedTransport::new(|_| StatusCode::NOT_FOUND);
        let c = test_client(1024, transport.clone());
        assert_eq!(c.resolve_unique_name("doc.pdf").await.unwrap(), "doc.pdf");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unique_name_propagates_probe_errors() {
        use crate::testing::{test_client, ScriptedTransport};

        let transport = ScriptedTransport::new(|_| StatusCode::INTERNAL_SERVER_ERROR);
        let c = test_client(1024, transport);
        let err = c.resolve_unique_name("doc.pdf").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_resolve_unique_name_exhausted() {
        use crate::testing::{test_client, ScriptedTransport};

        let transport = ScriptedTransport::new(|_| StatusCode::OK);
        let c = test_client(1024, transport.clone());
        let err = c.resolve_unique_name("a.txt").await.unwrap_err();
        assert!(matches!(err, BlobError::NameExhausted { attempts, .. } if attempts == MAX_NAME_ATTEMPTS));
        assert_eq!(transport.requests().len(), MAX_NAME_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_exists_probe_is_signed_get() {
        use crate::testing::{test_client, ScriptedTransport};

        let transport = ScriptedTransport::new(|_| StatusCode::NOT_FOUND);
        let c = test_client(1024, transport.clone());
        c.blob_exists("a.jpg").await.unwrap();
        let req = &transport.requests()[0];
        assert_eq!(req.method, Method::GET);
        assert!(req.header("Authorization").unwrap().starts_with("SharedKey testacct:"));
        assert!(req.header("x-ms-client-request-id").is_some());
        assert!(req.body.is_empty());
    }
}
