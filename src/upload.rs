//! Staged block upload and block-list commit.
//!
//! A block blob is written in two phases.  The source is read in chunks of
//! exactly `block_size` bytes (the last one may be shorter) and each chunk
//! is staged with Put Block under a fresh [`BlockId`].  Only after every
//! chunk has been acknowledged with 201 is the ordered id list committed
//! with Put Block List, which materializes the blob atomically.
//!
//! Up to `concurrency` blocks are in flight at once.  The block list keeps
//! source order regardless of completion order.  The first failure aborts
//! the remaining blocks and nothing is committed; staged blocks are left
//! for the service to expire.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{Method, StatusCode};
use md5::{Digest, Md5};
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::BlobClient;
use crate::errors::BlobError;
use crate::metrics;
use crate::xml::render_block_list;

/// Content type used when the caller does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type of the Put Block List body.
const BLOCK_LIST_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Opaque identifier of one staged block.
///
/// Standard base64 of a random UUID followed by two random bytes.  Eighteen
/// bytes encode to 24 characters without padding, so every id of a blob has
/// the same length.  `+` and `/` are percent-encoded in the query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId(String);

/// Raw bytes behind each block id; a multiple of 3 avoids `=` padding.
const BLOCK_ID_BYTES: usize = 18;

impl BlockId {
    pub fn generate() -> Self {
        let mut raw = [0u8; BLOCK_ID_BYTES];
        raw[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        raw[16..].copy_from_slice(&rand::random::<[u8; 2]>());
        Self(BASE64_STANDARD.encode(raw))
    }

    /// Wrap an id produced elsewhere.
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied blob properties for an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    /// Falls back to the client's `max-age` default when `None`.
    pub cache_control: Option<String>,
    /// Declared MD5 of the whole source, base64 or hex.  Checked against
    /// the streamed bytes before commit.
    pub content_md5: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            cache_control: None,
            content_md5: None,
        }
    }
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn content_md5(mut self, value: impl Into<String>) -> Self {
        self.content_md5 = Some(value.into());
        self
    }
}

/// Blob-level properties sent with Put Block List.
#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub content_type: String,
    pub cache_control: Option<String>,
    /// Base64 MD5 of the whole blob.
    pub content_md5: Option<String>,
}

/// Outcome of a committed upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub blob_name: String,
    /// Committed block ids in blob order.
    pub blocks: Vec<BlockId>,
    pub size: u64,
    /// Base64 MD5 of the uploaded bytes.
    pub content_md5: String,
}

impl BlobClient {
    /// Upload `source` as block blob `blob_name`.
    ///
    /// `size` is the declared source length and is checked against
    /// `block_size * MAX_BLOCK_COUNT` before any request is sent.  An empty
    /// source stages no blocks and commits an empty list.
    pub async fn upload_block_blob<R>(
        &self,
        blob_name: &str,
        mut source: R,
        size: u64,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, BlobError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let limit = self.credentials().max_blob_size();
        if size > limit {
            metrics::record_failure("blob_too_large");
            return Err(BlobError::BlobTooLarge { size, limit });
        }

        let started = Instant::now();
        let result = self.stage_and_commit(blob_name, &mut source, options).await;

        match &result {
            Ok(receipt) => {
                let elapsed = started.elapsed().as_secs_f64();
                metrics::record_commit(elapsed);
                info!(
                    "Uploaded {} ({} bytes, {} blocks) in {:.3}s",
                    blob_name,
                    receipt.size,
                    receipt.blocks.len(),
                    elapsed
                );
            }
            Err(e) => {
                metrics::record_failure(e.kind());
                warn!("Upload of {} failed: {}", blob_name, e);
            }
        }
        result
    }

    /// Upload the file at `path` as block blob `blob_name`.
    ///
    /// The file handle is closed on every exit path.
    pub async fn upload_file(
        &self,
        blob_name: &str,
        path: impl AsRef<Path>,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, BlobError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len();
        debug!("Uploading {} ({} bytes) to {}", path.as_ref().display(), size, blob_name);
        self.upload_block_blob(blob_name, file, size, options).await
    }

    async fn stage_and_commit<R>(
        &self,
        blob_name: &str,
        source: &mut R,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, BlobError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let block_size = self.credentials().block_size() as usize;
        let limit = self.credentials().max_blob_size();
        let concurrency = self.concurrency();

        let mut hasher = Md5::new();
        let mut total: u64 = 0;
        let mut slots: Vec<Option<BlockId>> = Vec::new();
        let mut in_flight: JoinSet<Result<(usize, BlockId), BlobError>> = JoinSet::new();

        loop {
            while in_flight.len() >= concurrency {
                collect_block(&mut in_flight, &mut slots).await?;
            }

            let chunk = read_chunk(source, block_size).await?;
            if chunk.is_empty() {
                break;
            }
            total += chunk.len() as u64;
            if total > limit {
                return Err(BlobError::BlobTooLarge { size: total, limit });
            }
            hasher.update(&chunk);

            let index = slots.len();
            slots.push(None);
            let client = self.clone();
            let name = blob_name.to_string();
            in_flight.spawn(async move {
                let id = client.stage_block(&name, chunk).await?;
                Ok((index, id))
            });
        }

        while !in_flight.is_empty() {
            collect_block(&mut in_flight, &mut slots).await?;
        }
        let blocks: Vec<BlockId> = slots.into_iter().flatten().collect();

        let computed = BASE64_STANDARD.encode(hasher.finalize());
        if let Some(declared) = options.content_md5.as_deref() {
            match normalize_content_md5(declared) {
                Some(expected) if expected == computed => {}
                _ => {
                    return Err(BlobError::ContentMd5Mismatch {
                        expected: declared.to_string(),
                        computed,
                    })
                }
            }
        }

        let commit = CommitOptions {
            content_type: options.content_type.clone(),
            cache_control: options
                .cache_control
                .clone()
                .or_else(|| self.default_cache_control().map(str::to_string)),
            content_md5: Some(computed.clone()),
        };
        self.commit_block_list(blob_name, &blocks, &commit).await?;

        Ok(UploadReceipt {
            blob_name: blob_name.to_string(),
            blocks,
            size: total,
            content_md5: computed,
        })
    }

    /// Stage one chunk with Put Block and return its id.
    pub async fn stage_block(&self, blob_name: &str, chunk: Bytes) -> Result<BlockId, BlobError> {
        let id = BlockId::generate();
        let uri = self.blob_uri(blob_name, &[("comp", "block"), ("blockid", id.as_str())]);
        let len = chunk.len();

        let mut builder = self.request(Method::PUT, uri);
        if len > 0 {
            builder = builder
                .header("Content-Length", len.to_string())
                .header("Content-MD5", BASE64_STANDARD.encode(Md5::digest(&chunk)));
        }

        self.execute("put_block", builder.build(), chunk)
            .await?
            .expect_status(StatusCode::CREATED)?;

        metrics::record_block(len);
        debug!("Staged block {} ({} bytes) for {}", id, len, blob_name);
        Ok(id)
    }

    /// Commit `blocks` in order as the content of `blob_name`.
    ///
    /// Put Block List is addressed with `comp=blocklist`; the service rejects
    /// `comp=block` without a block id.  Cache-Control is sent as
    /// `x-ms-blob-cache-control`, the block blob property header, not
    /// `x-ms-cache-control`.
    pub async fn commit_block_list(
        &self,
        blob_name: &str,
        blocks: &[BlockId],
        options: &CommitOptions,
    ) -> Result<(), BlobError> {
        let body = render_block_list(blocks);
        let uri = self.blob_uri(blob_name, &[("comp", "blocklist")]);

        let mut builder = self
            .request(Method::PUT, uri)
            .header("Content-Length", body.len().to_string())
            .header("Content-MD5", BASE64_STANDARD.encode(Md5::digest(body.as_bytes())))
            .header("Content-Type", BLOCK_LIST_CONTENT_TYPE)
            .header("x-ms-blob-content-type", options.content_type.as_str());
        if let Some(cache_control) = &options.cache_control {
            builder = builder.header("x-ms-blob-cache-control", cache_control.as_str());
        }
        if let Some(md5) = &options.content_md5 {
            builder = builder.header("x-ms-blob-content-md5", md5.as_str());
        }

        self.execute("put_block_list", builder.build(), Bytes::from(body))
            .await?
            .expect_status(StatusCode::CREATED)?;

        debug!("Committed {} blocks for {}", blocks.len(), blob_name);
        Ok(())
    }
}

/// Wait for one staged block and record its id at its source position.
async fn collect_block(
    in_flight: &mut JoinSet<Result<(usize, BlockId), BlobError>>,
    slots: &mut [Option<BlockId>],
) -> Result<(), BlobError> {
    if let Some(joined) = in_flight.join_next().await {
        let (index, id) = joined??;
        slots[index] = Some(id);
    }
    Ok(())
}

/// Read up to `block_size` bytes, returning fewer only at end of input.
async fn read_chunk<R>(source: &mut R, block_size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = source.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(Bytes::from(buffer))
}

/// Normalize a declared MD5 to base64.  Accepts 32-char hex or base64 of a
/// 16-byte digest.
pub fn normalize_content_md5(value: &str) -> Option<String> {
    let value = value.trim();
    if value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(value).ok()?;
        return Some(BASE64_STANDARD.encode(bytes));
    }
    match BASE64_STANDARD.decode(value) {
        Ok(bytes) if bytes.len() == 16 => Some(value.to_string()),
        _ => None,
    }
}
