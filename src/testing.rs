//! Scripted transport for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;

use crate::client::BlobClient;
use crate::credentials::CredentialSet;
use crate::transport::{Transport, TransportRequest, TransportResponse};

pub const TEST_KEY: &str = "dGVzdGtleQ==";

type Responder = dyn Fn(&TransportRequest) -> StatusCode + Send + Sync;
type Disconnect = dyn Fn(&TransportRequest) -> bool + Send + Sync;

/// Records every request and answers with the status chosen by `respond`.
pub struct ScriptedTransport {
    requests: Mutex<Vec<TransportRequest>>,
    respond: Box<Responder>,
    /// Delay before answering the n-th request.
    delays: Vec<Duration>,
    /// Delay for requests without an entry in `delays`.
    latency: Duration,
    /// Requests matching this fail without a response.
    disconnect: Option<Box<Disconnect>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    fn build(
        respond: Box<Responder>,
        delays: Vec<Duration>,
        latency: Duration,
        disconnect: Option<Box<Disconnect>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            respond,
            delays,
            latency,
            disconnect,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest) -> StatusCode + Send + Sync + 'static,
    {
        Self::build(Box::new(respond), Vec::new(), Duration::ZERO, None)
    }

    pub fn with_delays<F>(delays: Vec<Duration>, respond: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest) -> StatusCode + Send + Sync + 'static,
    {
        Self::build(Box::new(respond), delays, Duration::ZERO, None)
    }

    /// Accept everything, holding each request for `latency`.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Self::build(Box::new(|_| StatusCode::CREATED), Vec::new(), latency, None)
    }

    /// Accept everything except requests matching `drop_when`, which fail
    /// as if the connection was reset.
    pub fn disconnecting<F>(drop_when: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest) -> bool + Send + Sync + 'static,
    {
        Self::build(
            Box::new(|_| StatusCode::CREATED),
            Vec::new(),
            Duration::ZERO,
            Some(Box::new(drop_when)),
        )
    }

    /// Largest number of requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Answer Put Block and Put Block List with 201.
    pub fn accepting() -> Arc<Self> {
        Self::new(|_| StatusCode::CREATED)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn block_puts(&self) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.uri.contains("comp=block&"))
            .collect()
    }

    pub fn commits(&self) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.uri.ends_with("comp=blocklist"))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let delay = {
                let mut requests = self.requests.lock().unwrap();
                let delay = self.delays.get(requests.len()).copied();
                requests.push(request.clone());
                delay.unwrap_or(self.latency)
            };
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.disconnect.as_ref().is_some_and(|drop_when| drop_when(&request)) {
                anyhow::bail!("connection reset by peer");
            }
            let mut response = TransportResponse::new((self.respond)(&request));
            if !response.status.is_success() {
                response.body = Bytes::from_static(
                    b"<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>InternalError</Code></Error>",
                );
            }
            Ok(response)
        })
    }
}

/// Client for account `testacct`, container `media`.
pub fn test_client(block_size: i64, transport: Arc<ScriptedTransport>) -> BlobClient {
    let credentials = CredentialSet::new("testacct", TEST_KEY, "media", block_size).unwrap();
    BlobClient::new(credentials, transport)
}
