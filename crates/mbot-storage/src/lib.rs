//! Cloud storage for meeting recordings.
//!
//! This crate provides:
//! - The `StorageProvider` abstraction with S3 and Azure Blob implementations
//! - Resumable multipart backends (provider-direct and the files API)
//! - Provider selection from the environment

pub mod azure;
pub mod error;
pub mod factory;
pub mod files_api;
pub mod io;
pub mod multipart;
pub mod provider;
pub mod s3;

pub use azure::{AzureBlobStorageProvider, AzureConfig};
pub use error::{StorageError, StorageResult};
pub use factory::{create_provider, provider_from_env, StorageConfig};
pub use files_api::{FilesApiBackend, FilesApiConfig};
pub use io::{part_windows, read_range};
pub use multipart::{
    FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
};
pub use provider::{
    ProviderKind, SignedUrlOptions, StorageProvider, UploadOptions, DEFAULT_PART_SIZE,
    DEFAULT_UPLOAD_CONCURRENCY,
};
pub use s3::{S3Config, S3StorageProvider};
