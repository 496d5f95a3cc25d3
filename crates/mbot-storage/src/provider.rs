//! Storage provider abstraction.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};
use crate::multipart::MultipartBackend;

/// Default multipart part size (50 MiB).
pub const DEFAULT_PART_SIZE: u64 = 50 * 1024 * 1024;

/// Default number of parts in flight for provider-managed uploads.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Default lifetime of signed URLs.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Read a non-empty environment variable.
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Which storage provider backs the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    #[default]
    S3,
    Azure,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::S3 => "s3",
            ProviderKind::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(ProviderKind::S3),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(StorageError::config_error(format!(
                "Unknown storage provider '{}', expected 's3' or 'azure'",
                other
            ))),
        }
    }
}

/// Options for uploading a local file.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Local file to upload
    pub file_path: PathBuf,
    /// Full object key, decided by the caller
    pub key: String,
    /// MIME type stored with the object
    pub content_type: String,
    /// Part size for multipart transfers
    pub part_size: Option<u64>,
    /// Parts in flight for multipart transfers
    pub concurrency: Option<usize>,
}

impl UploadOptions {
    pub fn new(
        file_path: impl Into<PathBuf>,
        key: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            key: key.into(),
            content_type: content_type.into(),
            part_size: None,
            concurrency: None,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Options for signed URL generation.
#[derive(Debug, Clone, Default)]
pub struct SignedUrlOptions {
    pub expires_in: Option<Duration>,
    pub content_type: Option<String>,
}

impl SignedUrlOptions {
    pub fn expires_in(expires_in: Duration) -> Self {
        Self {
            expires_in: Some(expires_in),
            content_type: None,
        }
    }
}

/// A durable object store a recording can be uploaded to.
///
/// Implementations are stateless beyond their configuration and are shared
/// read-only between upload sessions.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Check that every required setting is present.
    ///
    /// Called at startup so misconfiguration fails before any transfer begins.
    fn validate_config(&self) -> StorageResult<()>;

    /// Upload a local file to `options.key`.
    async fn put_file(&self, options: &UploadOptions) -> StorageResult<()>;

    /// Upload a local file, logging instead of returning the failure.
    async fn upload_file(&self, options: &UploadOptions) -> bool {
        match self.put_file(options).await {
            Ok(()) => {
                info!(
                    provider = %self.kind(),
                    key = %options.key,
                    "Upload of {} complete", options.file_path.display()
                );
                true
            }
            Err(e) => {
                error!(
                    provider = %self.kind(),
                    key = %options.key,
                    "Upload of {} failed: {}", options.file_path.display(), e
                );
                false
            }
        }
    }

    /// Generate a time-limited read URL.
    async fn signed_url(&self, _key: &str, _options: &SignedUrlOptions) -> StorageResult<String> {
        Err(StorageError::unsupported(self.kind().as_str(), "signed_url"))
    }

    /// Check if an object exists.
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Err(StorageError::unsupported(self.kind().as_str(), "exists"))
    }

    /// Delete an object.
    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::unsupported(self.kind().as_str(), "delete"))
    }

    /// List object keys under a prefix.
    async fn list(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Err(StorageError::unsupported(self.kind().as_str(), "list"))
    }

    /// Drive resumable multipart sessions directly against this provider.
    fn multipart(self: Arc<Self>) -> Arc<dyn MultipartBackend>;
}
