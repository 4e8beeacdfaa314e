//! bluestore library -- Azure Blob Storage block upload client.
//!
//! This crate signs requests with the Shared Key scheme, uploads block
//! blobs as staged blocks followed by an atomic block-list commit, probes
//! blob existence and resolves collision-free blob names.

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod metrics;
pub mod request;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod upload;
pub mod xml;

pub use client::BlobClient;
pub use credentials::{validate_credentials, CredentialSet, MAX_BLOCK_COUNT, MAX_BLOCK_SIZE};
pub use errors::BlobError;
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use upload::{BlockId, CommitOptions, UploadOptions, UploadReceipt};
