//! Resumable multipart upload backends.
//!
//! A backend knows how to open a multipart session, hand out a URL per part,
//! move the bytes of one part and commit the session. The upload state machine
//! that drives these calls lives with the recording pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use mbot_models::{ContentType, RecordedFile};
use reqwest::header::{CONTENT_TYPE, ETAG};

use crate::error::{StorageError, StorageResult};

/// What is being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRequest {
    /// Team that owns the recording
    pub team_id: String,
    /// Destination folder
    pub folder_id: String,
    /// Object name or key
    pub key: String,
    /// MIME type of the recording
    pub content_type: ContentType,
}

impl MultipartRequest {
    pub fn new(
        team_id: impl Into<String>,
        folder_id: impl Into<String>,
        key: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            folder_id: folder_id.into(),
            key: key.into(),
            content_type,
        }
    }
}

/// Identifiers of an open multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHandle {
    pub file_id: String,
    pub upload_id: String,
}

/// Confirmation that one part landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// 1-based part number
    pub part_number: u32,
    /// Provider entity tag, when the provider returns one
    pub etag: Option<String>,
}

/// Metadata attached when the session is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeDetails {
    /// Display name of the recording
    pub name: String,
    /// Bot that produced the recording
    pub bot_id: Option<String>,
}

/// A service able to run resumable multipart sessions.
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Open a new session.
    async fn initialize(&self, request: &MultipartRequest) -> StorageResult<MultipartHandle>;

    /// Obtain the URL to PUT a part to.
    async fn part_upload_url(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        part_number: u32,
    ) -> StorageResult<String>;

    /// Send the bytes of one part to a URL from [`Self::part_upload_url`].
    async fn upload_part(
        &self,
        request: &MultipartRequest,
        url: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartReceipt>;

    /// Commit the session. `parts` is ordered by part number.
    async fn finalize(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        parts: &[PartReceipt],
        details: &FinalizeDetails,
    ) -> StorageResult<RecordedFile>;

    /// Release a session that will not be committed.
    async fn abort(&self, _request: &MultipartRequest, _handle: &MultipartHandle) -> StorageResult<()> {
        Ok(())
    }
}

/// PUT a part body to a pre-authorized URL and return the entity tag.
///
/// The content type is sent as-is since some services sign it into the URL.
pub async fn put_part(
    http: &reqwest::Client,
    url: &str,
    content_type: &str,
    data: Bytes,
) -> StorageResult<Option<String>> {
    let response = http
        .put(url)
        .header(CONTENT_TYPE, content_type)
        .body(data)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::from_http_status(status.as_u16(), body));
    }

    Ok(response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string()))
}
