//! Typed failures for blob operations.
//!
//! Every fallible operation in the crate returns [`BlobError`].  Variants
//! that correspond to a request on the wire carry the
//! `x-ms-client-request-id` that was sent, so a failure can be correlated
//! with the service-side logs.

use http::StatusCode;
use thiserror::Error;

/// Generate a fresh client request id (32 lowercase hex characters).
pub fn generate_request_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Errors raised by the credential, signing, upload and probe layers.
#[derive(Debug, Error)]
pub enum BlobError {
    /// A credential field failed validation. Raised before any network call.
    #[error("invalid {field}: {reason}")]
    InvalidCredential { field: String, reason: String },

    /// The source is larger than `block_size * MAX_BLOCK_COUNT`.
    #[error("blob of {size} bytes exceeds the upload limit of {limit} bytes")]
    BlobTooLarge { size: u64, limit: u64 },

    /// The request descriptor was not fully populated before signing.
    #[error("cannot sign request: {missing} is empty")]
    SigningPrecondition { missing: &'static str },

    /// The transport failed before a response was received.
    #[error("transport failure during {operation} (request id {request_id}): {source}")]
    Transport {
        operation: &'static str,
        request_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The service answered with a status the operation does not accept.
    #[error("{operation} failed with HTTP {status} (request id {request_id})")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusCode,
        request_id: String,
        body: String,
    },

    /// The caller-declared Content-MD5 does not match the streamed bytes.
    #[error("content MD5 mismatch: declared {expected}, computed {computed}")]
    ContentMd5Mismatch { expected: String, computed: String },

    /// No free name was found within the probe limit.
    #[error("no unique name found for {name} after {attempts} attempts")]
    NameExhausted { name: String, attempts: u32 },

    /// Reading the upload source failed.
    #[error("failed to read upload source: {0}")]
    Io(#[from] std::io::Error),

    /// A concurrent block upload task panicked or was cancelled.
    #[error("block upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BlobError {
    /// Return the client request id associated with this error, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            BlobError::Transport { request_id, .. }
            | BlobError::UnexpectedStatus { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Return the HTTP status for protocol errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BlobError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            BlobError::InvalidCredential { .. } => "invalid_credential",
            BlobError::BlobTooLarge { .. } => "blob_too_large",
            BlobError::SigningPrecondition { .. } => "signing_precondition",
            BlobError::Transport { .. } => "transport",
            BlobError::UnexpectedStatus { .. } => "unexpected_status",
            BlobError::ContentMd5Mismatch { .. } => "content_md5_mismatch",
            BlobError::NameExhausted { .. } => "name_exhausted",
            BlobError::Io(_) => "io",
            BlobError::Task(_) => "task",
        }
    }
}
