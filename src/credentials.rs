//! Validated storage-account credentials.
//!
//! A [`CredentialSet`] is built once from configuration and never changes
//! afterwards.  Construction is all-or-nothing: the first field that fails
//! its rule aborts construction and is named in the error.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use garde::Validate;

use crate::config::AzureConfig;
use crate::errors::BlobError;

/// Largest block the service accepts in a single Put Block, in bytes.
pub const MAX_BLOCK_SIZE: u64 = 102_400;

/// Largest number of blocks a single block blob may hold.
pub const MAX_BLOCK_COUNT: u64 = 50_000;

const MAX_BLOCK_SIZE_SIGNED: i64 = MAX_BLOCK_SIZE as i64;

/// Raw credential fields as they arrive from configuration.
///
/// Field order matters: validation errors are reported for the first
/// failing field in declaration order.
#[derive(Debug, Validate)]
pub struct CredentialInput {
    /// Storage account: 3-24 lowercase letters and digits.
    #[garde(length(min = 3, max = 24), pattern(r"^[a-z0-9]+$"))]
    pub account: String,

    /// Access key: standard base64.
    #[garde(custom(is_base64_key))]
    pub key: String,

    /// Container: 3-63 lowercase letters, digits and single hyphens,
    /// starting and ending with a letter or digit.
    #[garde(length(min = 3, max = 63), pattern(r"^[a-z0-9]+(-[a-z0-9]+)*$"))]
    pub container: String,

    /// Block size in bytes.
    #[garde(range(min = 1, max = MAX_BLOCK_SIZE_SIGNED))]
    pub block_size: i64,
}

#[allow(clippy::ptr_arg)]
fn is_base64_key(value: &String, _ctx: &()) -> garde::Result {
    if value.is_empty() {
        return Err(garde::Error::new("must not be empty"));
    }
    BASE64_STANDARD
        .decode(value)
        .map(|_| ())
        .map_err(|e| garde::Error::new(format!("not valid base64: {e}")))
}

/// Account name, decoded key, container and block size for one client.
#[derive(Clone)]
pub struct CredentialSet {
    account: String,
    key: Vec<u8>,
    container: String,
    block_size: u64,
}

impl CredentialSet {
    /// Validate all four fields and build the credential set.
    pub fn new(
        account: &str,
        key: &str,
        container: &str,
        block_size: i64,
    ) -> Result<Self, BlobError> {
        let input = CredentialInput {
            account: account.to_string(),
            key: key.to_string(),
            container: container.to_string(),
            block_size,
        };
        if let Err(report) = input.validate() {
            let (field, reason) = report
                .iter()
                .next()
                .map(|(path, error)| (path.to_string(), error.message().to_string()))
                .unwrap_or_else(|| ("credentials".to_string(), report.to_string()));
            return Err(BlobError::InvalidCredential { field, reason });
        }

        let key = BASE64_STANDARD
            .decode(key)
            .map_err(|e| BlobError::InvalidCredential {
                field: "key".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            account: input.account,
            key,
            container: input.container,
            block_size: block_size as u64,
        })
    }

    /// Build a credential set from the `azure` configuration section.
    pub fn from_config(config: &AzureConfig) -> Result<Self, BlobError> {
        Self::new(
            &config.account,
            &config.key,
            &config.container,
            config.block_size,
        )
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The decoded access key bytes used as the HMAC key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Largest source size this credential set can upload.
    pub fn max_blob_size(&self) -> u64 {
        self.block_size * MAX_BLOCK_COUNT
    }
}

// The key never appears in logs.
impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .field("container", &self.container)
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// Validate persisted configuration without building a client.
pub fn validate_credentials(config: &AzureConfig) -> Result<(), BlobError> {
    CredentialSet::from_config(config).map(|_| ())
}
