//! Azure Blob Storage provider over the Blob REST API.

mod config;
mod signing;

pub use config::AzureConfig;

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use mbot_models::RecordedFile;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::io::{part_windows, read_range};
use crate::multipart::{
    put_part, FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
};
use crate::provider::{
    ProviderKind, SignedUrlOptions, StorageProvider, UploadOptions, DEFAULT_PART_SIZE,
};
use config::{AzureAccount, AzureCredential};
use signing::{ms_date, sign_request, BlobSas, API_VERSION};

/// Azure Blob Storage provider using block blobs.
pub struct AzureBlobStorageProvider {
    config: AzureConfig,
    account: Result<AzureAccount, String>,
    http: reqwest::Client,
}

impl AzureBlobStorageProvider {
    pub fn new(config: AzureConfig) -> Self {
        let account = config.resolve();
        Self {
            config,
            account,
            http: reqwest::Client::new(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(AzureConfig::from_env())
    }

    fn account(&self) -> StorageResult<&AzureAccount> {
        self.account
            .as_ref()
            .map_err(|e| StorageError::config_error(e.clone()))
    }

    fn container(&self) -> StorageResult<&str> {
        self.config
            .container
            .as_deref()
            .ok_or_else(|| StorageError::config_error("AZURE_STORAGE_CONTAINER is required"))
    }

    fn container_url(&self) -> StorageResult<Url> {
        let account = self.account()?;
        parse_url(&format!("{}/{}", account.endpoint, self.container()?))
    }

    fn blob_url(&self, blob: &str) -> StorageResult<Url> {
        let account = self.account()?;
        parse_url(&format!(
            "{}/{}/{}",
            account.endpoint,
            self.container()?,
            encode_blob_name(blob)
        ))
    }

    fn block_url(&self, blob: &str, block_id: &str) -> StorageResult<Url> {
        let mut url = self.blob_url(blob)?;
        url.query_pairs_mut()
            .append_pair("comp", "block")
            .append_pair("blockid", block_id);
        Ok(url)
    }

    /// Authorize and send a request, failing on any non-success status.
    async fn execute(&self, builder: RequestBuilder) -> StorageResult<Response> {
        let account = self.account()?;
        let mut request = builder
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", ms_date(Utc::now()))
            .build()?;

        match &account.credential {
            AzureCredential::SharedKey(key) => sign_request(&mut request, &account.name, key)?,
            AzureCredential::Sas(token) => append_query(request.url_mut(), token),
        }

        let response = self.http.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_http_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn put_blob(&self, key: &str, content_type: &str, data: Bytes) -> StorageResult<()> {
        let builder = self
            .http
            .put(self.blob_url(key)?)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-blob-content-type", content_type)
            .header(CONTENT_LENGTH, data.len())
            .body(data);
        self.execute(builder).await?;
        Ok(())
    }

    async fn put_block(&self, key: &str, block_id: &str, data: Bytes) -> StorageResult<()> {
        let builder = self
            .http
            .put(self.block_url(key, block_id)?)
            .header(CONTENT_LENGTH, data.len())
            .body(data);
        self.execute(builder).await?;
        Ok(())
    }

    async fn put_block_list(
        &self,
        key: &str,
        content_type: &str,
        block_ids: &[String],
    ) -> StorageResult<()> {
        let mut url = self.blob_url(key)?;
        url.query_pairs_mut().append_pair("comp", "blocklist");

        let body = block_list_xml(block_ids);
        let builder = self
            .http
            .put(url)
            .header("x-ms-blob-content-type", content_type)
            .header(CONTENT_TYPE, "application/xml")
            .header(CONTENT_LENGTH, body.len())
            .body(body);
        self.execute(builder).await?;
        Ok(())
    }

    /// Query string authorizing a single-blob operation from outside the worker.
    fn blob_sas(&self, blob: &str, permissions: &str, ttl: std::time::Duration) -> StorageResult<String> {
        let account = self.account()?;
        match &account.credential {
            AzureCredential::SharedKey(key) => {
                let expiry = Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| StorageError::PresignFailed(e.to_string()))?;
                BlobSas {
                    account: &account.name,
                    container: self.container()?,
                    blob,
                    permissions,
                    expiry,
                    https_only: account.is_https(),
                }
                .to_query(key)
            }
            AzureCredential::Sas(token) => Ok(token.clone()),
        }
    }
}

fn parse_url(raw: &str) -> StorageResult<Url> {
    Url::parse(raw).map_err(|e| StorageError::config_error(format!("Invalid blob URL {}: {}", raw, e)))
}

fn append_query(url: &mut Url, extra: &str) {
    if extra.is_empty() {
        return;
    }
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, extra),
        _ => extra.to_string(),
    };
    url.set_query(Some(&query));
}

/// Percent-encode each path segment of a blob name, keeping the separators.
fn encode_blob_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Short random tag that scopes block ids to one upload session.
fn new_session_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Block id for a part. Every id of one blob has the same encoded length.
fn block_id(session_tag: &str, part_number: u32) -> String {
    STANDARD.encode(format!("{}-{:06}", session_tag, part_number))
}

fn block_list_xml(block_ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in block_ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Text of every `<tag>` element in a response body.
fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                values.push(xml_unescape(&after[..end]));
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    values
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl StorageProvider for AzureBlobStorageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn validate_config(&self) -> StorageResult<()> {
        self.account()?;
        Ok(())
    }

    async fn put_file(&self, options: &UploadOptions) -> StorageResult<()> {
        self.account()?;
        let size = tokio::fs::metadata(&options.file_path).await?.len();
        let part_size = options.part_size.unwrap_or(DEFAULT_PART_SIZE).max(1);
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.upload_concurrency)
            .max(1);

        info!(
            key = %options.key,
            size,
            "Starting Azure Blob upload of {}", options.file_path.display()
        );

        if size <= part_size {
            let data = Bytes::from(tokio::fs::read(&options.file_path).await?);
            return self.put_blob(&options.key, &options.content_type, data).await;
        }

        let tag = new_session_tag();
        let windows = part_windows(size, part_size);
        let block_ids: Vec<String> = (1..=windows.len() as u32)
            .map(|part| block_id(&tag, part))
            .collect();

        let results: Vec<StorageResult<u64>> = stream::iter(windows.into_iter().zip(block_ids.clone()))
            .map(|((offset, len), id)| async move {
                let data = read_range(&options.file_path, offset, len).await?;
                self.put_block(&options.key, &id, data).await?;
                Ok::<_, StorageError>(offset + len)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut loaded = 0;
        for result in results {
            loaded = loaded.max(result?);
        }
        debug!(key = %options.key, "Azure upload progress: {} bytes", loaded);

        self.put_block_list(&options.key, &options.content_type, &block_ids)
            .await
    }

    async fn signed_url(&self, key: &str, options: &SignedUrlOptions) -> StorageResult<String> {
        let ttl = options.expires_in.unwrap_or(self.config.signed_url_ttl);
        let mut url = self.blob_url(key)?;
        append_query(&mut url, &self.blob_sas(key, "r", ttl)?);
        Ok(url.to_string())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.execute(self.http.head(self.blob_url(key)?)).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let builder = self
            .http
            .delete(self.blob_url(key)?)
            .header("x-ms-delete-snapshots", "include");

        self.execute(builder).await.map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::not_found(key),
            other => StorageError::delete_failed(other.to_string()),
        })?;

        info!("Deleted {} from Azure container", key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url()?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("restype", "container")
                    .append_pair("comp", "list")
                    .append_pair("prefix", prefix);
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let body = self
                .execute(self.http.request(Method::GET, url))
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?
                .text()
                .await?;

            names.extend(xml_values(&body, "Name"));

            marker = xml_values(&body, "NextMarker")
                .into_iter()
                .find(|m| !m.is_empty());
            if marker.is_none() {
                break;
            }
        }

        Ok(names)
    }

    fn multipart(self: Arc<Self>) -> Arc<dyn MultipartBackend> {
        self
    }
}

#[async_trait]
impl MultipartBackend for AzureBlobStorageProvider {
    async fn initialize(&self, request: &MultipartRequest) -> StorageResult<MultipartHandle> {
        self.account()?;
        Ok(MultipartHandle {
            file_id: request.key.clone(),
            upload_id: new_session_tag(),
        })
    }

    async fn part_upload_url(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        part_number: u32,
    ) -> StorageResult<String> {
        let mut url = self.block_url(&request.key, &block_id(&handle.upload_id, part_number))?;
        append_query(
            &mut url,
            &self.blob_sas(&request.key, "cw", self.config.signed_url_ttl)?,
        );
        Ok(url.to_string())
    }

    async fn upload_part(
        &self,
        request: &MultipartRequest,
        url: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartReceipt> {
        let etag = put_part(&self.http, url, request.content_type.as_str(), data).await?;
        Ok(PartReceipt { part_number, etag })
    }

    async fn finalize(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        parts: &[PartReceipt],
        details: &FinalizeDetails,
    ) -> StorageResult<RecordedFile> {
        let block_ids = parts
            .iter()
            .map(|part| block_id(&handle.upload_id, part.part_number))
            .collect::<Vec<_>>();

        self.put_block_list(&request.key, request.content_type.as_str(), &block_ids)
            .await?;

        Ok(RecordedFile {
            id: handle.file_id.clone(),
            name: details.name.clone(),
            size: None,
            provider_key: Some(request.key.clone()),
            url: None,
        })
    }
}

impl std::fmt::Debug for AzureBlobStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStorageProvider")
            .field("container", &self.config.container)
            .field("account", &self.account.as_ref().map(|a| &a.name))
            .finish()
    }
}
