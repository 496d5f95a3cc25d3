//! Multipart backend for the recording platform's files API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mbot_models::RecordedFile;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::multipart::{
    put_part, FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
};
use crate::provider::env_opt;

/// Configuration for the files API.
#[derive(Debug, Clone)]
pub struct FilesApiConfig {
    /// Base URL including the API version, e.g. `https://api.example.com/v2`
    pub base_url: String,
    /// Per-request timeout, part uploads included
    pub timeout: Duration,
}

impl Default for FilesApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v2".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl FilesApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_opt("FILES_API_BASE_URL").unwrap_or(defaults.base_url),
            timeout: env_opt("FILES_API_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Every files API response wraps its payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitData {
    file_id: String,
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartUrlData {
    #[serde(default)]
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct FinalizeData {
    file: RecordedFile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentTypeBody<'a> {
    content_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeFile<'a> {
    content_type: &'a str,
    name: &'a str,
    bot_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FinalizeBody<'a> {
    file: FinalizeFile<'a>,
}

/// Files API client authenticated with one job's bearer token.
#[derive(Clone)]
pub struct FilesApiBackend {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl FilesApiBackend {
    pub fn new(config: &FilesApiConfig, bearer_token: impl Into<String>) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let path = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/files/upload/multipart/{}", self.base_url, path)
    }

    async fn put_json<B, T>(&self, url: &str, body: &B) -> StorageResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_http_status(status.as_u16(), body));
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }
}

impl std::fmt::Debug for FilesApiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesApiBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl MultipartBackend for FilesApiBackend {
    async fn initialize(&self, request: &MultipartRequest) -> StorageResult<MultipartHandle> {
        let url = self.url(&["init", &request.team_id, &request.folder_id]);
        let data: InitData = self
            .put_json(
                &url,
                &ContentTypeBody {
                    content_type: request.content_type.as_str(),
                },
            )
            .await?;

        debug!(file_id = %data.file_id, "Initialized multipart upload {}", data.upload_id);
        Ok(MultipartHandle {
            file_id: data.file_id,
            upload_id: data.upload_id,
        })
    }

    async fn part_upload_url(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        part_number: u32,
    ) -> StorageResult<String> {
        let part = part_number.to_string();
        let url = self.url(&[
            "url",
            &request.team_id,
            &request.folder_id,
            &handle.file_id,
            &handle.upload_id,
            &part,
        ]);
        let data: PartUrlData = self
            .put_json(
                &url,
                &ContentTypeBody {
                    content_type: request.content_type.as_str(),
                },
            )
            .await?;

        if data.upload_url.is_empty() {
            return Err(StorageError::upload_failed("No upload URL provided"));
        }
        Ok(data.upload_url)
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
        _parts: &[PartReceipt],
        details: &FinalizeDetails,
    ) -> StorageResult<RecordedFile> {
        let url = self.url(&[
            "finalize",
            &request.team_id,
            &request.folder_id,
            &handle.file_id,
            &handle.upload_id,
        ]);
        let body = FinalizeBody {
            file: FinalizeFile {
                content_type: request.content_type.as_str(),
                name: &details.name,
                bot_id: details.bot_id.as_deref(),
            },
        };

        let data: FinalizeData = self.put_json(&url, &body).await?;
        Ok(data.file)
    }
}
