//! Azure Blob Storage configuration and credential resolution.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::provider::{DEFAULT_SIGNED_URL_TTL, DEFAULT_UPLOAD_CONCURRENCY};
use crate::provider::env_opt;

/// Account name and key of the local storage emulator.
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Configuration for the Azure Blob provider.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub connection_string: Option<String>,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub container: Option<String>,
    /// Blob service endpoint override, e.g. for an emulator
    pub endpoint: Option<String>,
    pub use_managed_identity: bool,
    pub upload_concurrency: usize,
    pub signed_url_ttl: Duration,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            account_name: None,
            account_key: None,
            sas_token: None,
            container: None,
            endpoint: None,
            use_managed_identity: false,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }
}

impl AzureConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            connection_string: env_opt("AZURE_STORAGE_CONNECTION_STRING"),
            account_name: env_opt("AZURE_STORAGE_ACCOUNT"),
            account_key: env_opt("AZURE_STORAGE_KEY"),
            sas_token: env_opt("AZURE_STORAGE_SAS_TOKEN"),
            container: env_opt("AZURE_STORAGE_CONTAINER"),
            endpoint: env_opt("AZURE_STORAGE_ENDPOINT"),
            use_managed_identity: env_opt("AZURE_USE_MANAGED_IDENTITY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            upload_concurrency: env_opt("AZURE_STORAGE_UPLOAD_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY),
            signed_url_ttl: env_opt("AZURE_SIGNED_URL_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SIGNED_URL_TTL),
        }
    }

    /// Resolve the account, endpoint and credential this config describes.
    ///
    /// Precedence: connection string, then account with SAS token, then
    /// account with shared key.
    pub(crate) fn resolve(&self) -> Result<AzureAccount, String> {
        let account = if let Some(connection_string) = &self.connection_string {
            parse_connection_string(connection_string)?
        } else if let (Some(name), Some(sas)) = (&self.account_name, &self.sas_token) {
            AzureAccount::new(
                name.clone(),
                self.endpoint_for(name),
                AzureCredential::Sas(sas.trim_start_matches('?').to_string()),
            )
        } else if let (Some(name), Some(key)) = (&self.account_name, &self.account_key) {
            AzureAccount::new(name.clone(), self.endpoint_for(name), decode_key(key)?)
        } else if self.account_name.is_some() && self.use_managed_identity {
            return Err(
                "Managed identity is not supported; provide AZURE_STORAGE_KEY or AZURE_STORAGE_SAS_TOKEN"
                    .to_string(),
            );
        } else {
            return Err("Azure Blob Storage configuration incomplete. Provide \
                        AZURE_STORAGE_CONNECTION_STRING or AZURE_STORAGE_ACCOUNT with \
                        AZURE_STORAGE_SAS_TOKEN or AZURE_STORAGE_KEY"
                .to_string());
        };

        if self.container.is_none() {
            return Err("AZURE_STORAGE_CONTAINER is required".to_string());
        }

        Ok(account)
    }

    fn endpoint_for(&self, account: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account))
    }
}

/// How requests to the account are authorized.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum AzureCredential {
    /// Decoded account key
    SharedKey(Vec<u8>),
    /// SAS query string without the leading '?'
    Sas(String),
}

impl std::fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureCredential::SharedKey(_) => f.write_str("SharedKey(..)"),
            AzureCredential::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// A resolved storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AzureAccount {
    pub name: String,
    /// Blob service endpoint without a trailing slash
    pub endpoint: String,
    pub credential: AzureCredential,
}

impl AzureAccount {
    fn new(name: String, endpoint: String, credential: AzureCredential) -> Self {
        Self {
            name,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn is_https(&self) -> bool {
        self.endpoint.starts_with("https://")
    }
}

fn decode_key(key: &str) -> Result<AzureCredential, String> {
    STANDARD
        .decode(key.trim())
        .map(AzureCredential::SharedKey)
        .map_err(|e| format!("Azure account key is not valid base64: {}", e))
}

fn parse_connection_string(connection_string: &str) -> Result<AzureAccount, String> {
    let pairs: HashMap<&str, &str> = connection_string
        .split(';')
        .filter_map(|segment| segment.trim().split_once('='))
        .collect();

    if pairs
        .get("UseDevelopmentStorage")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return Ok(AzureAccount::new(
            DEV_ACCOUNT_NAME.to_string(),
            DEV_BLOB_ENDPOINT.to_string(),
            decode_key(DEV_ACCOUNT_KEY)?,
        ));
    }

    let name = pairs
        .get("AccountName")
        .ok_or_else(|| "Connection string is missing AccountName".to_string())?
        .to_string();

    let endpoint = match pairs.get("BlobEndpoint") {
        Some(endpoint) => endpoint.to_string(),
        None => format!(
            "{}://{}.blob.{}",
            pairs.get("DefaultEndpointsProtocol").unwrap_or(&"https"),
            name,
            pairs.get("EndpointSuffix").unwrap_or(&"core.windows.net")
        ),
    };

    let credential = if let Some(key) = pairs.get("AccountKey") {
        decode_key(key)?
    } else if let Some(sas) = pairs.get("SharedAccessSignature") {
        AzureCredential::Sas(sas.trim_start_matches('?').to_string())
    } else {
        return Err("Connection string has neither AccountKey nor SharedAccessSignature".to_string());
    };

    Ok(AzureAccount::new(name, endpoint, credential))
}
