//! Prometheus metrics for bluestore.
//!
//! Defines metric name constants and recording helpers used by the client.
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed; the binary installs the Prometheus recorder from
//! `metrics-exporter-prometheus` when `observability.metrics` is enabled.

use http::StatusCode;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Total requests sent (counter). Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "bluestore_requests_total";

/// Total blocks staged successfully (counter).
pub const BLOCKS_STAGED_TOTAL: &str = "bluestore_blocks_staged_total";

/// Total bytes staged in blocks (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "bluestore_bytes_uploaded_total";

/// Total successful block-list commits (counter).
pub const COMMITS_TOTAL: &str = "bluestore_commits_total";

/// Total failed uploads (counter). Labels: kind.
pub const UPLOAD_FAILURES_TOTAL: &str = "bluestore_upload_failures_total";

/// Upload duration in seconds, stage plus commit (histogram).
pub const UPLOAD_DURATION_SECONDS: &str = "bluestore_upload_duration_seconds";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total Blob service requests by operation and status");
    describe_counter!(BLOCKS_STAGED_TOTAL, "Total blocks staged with Put Block");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes staged in blocks");
    describe_counter!(COMMITS_TOTAL, "Total successful Put Block List commits");
    describe_counter!(UPLOAD_FAILURES_TOTAL, "Total failed uploads by error kind");
    describe_histogram!(UPLOAD_DURATION_SECONDS, "Block blob upload duration in seconds");
}

/// Render the Prometheus exposition text, if the recorder was installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

// -- Recording helpers --------------------------------------------------------

/// Record one response for `operation`.
pub fn record_request(operation: &'static str, status: StatusCode) {
    counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status.as_u16().to_string())
        .increment(1);
}

/// Record one staged block of `bytes` bytes.
pub fn record_block(bytes: usize) {
    counter!(BLOCKS_STAGED_TOTAL).increment(1);
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes as u64);
}

/// Record a completed upload and its duration.
pub fn record_commit(duration_secs: f64) {
    counter!(COMMITS_TOTAL).increment(1);
    histogram!(UPLOAD_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed upload by error kind.
pub fn record_failure(kind: &'static str) {
    counter!(UPLOAD_FAILURES_TOTAL, "kind" => kind).increment(1);
}
