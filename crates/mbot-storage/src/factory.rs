//! Provider selection.

use std::sync::Arc;

use tracing::info;

use crate::azure::{AzureBlobStorageProvider, AzureConfig};
use crate::error::StorageResult;
use crate::provider::{env_opt, ProviderKind, StorageProvider};
use crate::s3::{S3Config, S3StorageProvider};

/// Which provider the process uses.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub provider: ProviderKind,
}

impl StorageConfig {
    /// Create config from `STORAGE_PROVIDER` (default `s3`).
    pub fn from_env() -> StorageResult<Self> {
        let provider = match env_opt("STORAGE_PROVIDER") {
            Some(value) => value.parse()?,
            None => ProviderKind::default(),
        };
        Ok(Self { provider })
    }
}

/// Build the provider of the given kind from its environment configuration.
pub fn create_provider(kind: ProviderKind) -> Arc<dyn StorageProvider> {
    match kind {
        ProviderKind::S3 => Arc::new(S3StorageProvider::new(S3Config::from_env())),
        ProviderKind::Azure => Arc::new(AzureBlobStorageProvider::new(AzureConfig::from_env())),
    }
}

/// Select, build and validate the configured provider.
pub fn provider_from_env() -> StorageResult<Arc<dyn StorageProvider>> {
    let config = StorageConfig::from_env()?;
    let provider = create_provider(config.provider);
    provider.validate_config()?;

    info!("Using {} storage provider", provider.kind());
    Ok(provider)
}
