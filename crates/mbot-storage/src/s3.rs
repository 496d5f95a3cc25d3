//! S3-compatible storage provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use mbot_models::RecordedFile;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::io::{part_windows, read_range};
use crate::multipart::{
    put_part, FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
};
use crate::provider::{
    env_opt, ProviderKind, SignedUrlOptions, StorageProvider, UploadOptions, DEFAULT_PART_SIZE,
    DEFAULT_SIGNED_URL_TTL, DEFAULT_UPLOAD_CONCURRENCY,
};

/// Smallest part size S3 accepts for every part but the last.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Configuration for the S3 provider.
///
/// Every field is optional so that a partial configuration can be reported in
/// full by [`S3StorageProvider::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub signed_url_ttl: Duration,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            region: env_opt("S3_REGION"),
            access_key_id: env_opt("S3_ACCESS_KEY_ID"),
            secret_access_key: env_opt("S3_SECRET_ACCESS_KEY"),
            bucket: env_opt("S3_BUCKET_NAME"),
            endpoint: env_opt("S3_ENDPOINT"),
            force_path_style: env_opt("S3_FORCE_PATH_STYLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            signed_url_ttl: env_opt("S3_SIGNED_URL_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SIGNED_URL_TTL),
        }
    }

    /// Names of the required settings that are not set.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            ("S3_REGION", &self.region),
            ("S3_ACCESS_KEY_ID", &self.access_key_id),
            ("S3_SECRET_ACCESS_KEY", &self.secret_access_key),
            ("S3_BUCKET_NAME", &self.bucket),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

fn sdk_error<E: std::error::Error>(e: E) -> StorageError {
    StorageError::from_sdk_message(DisplayErrorContext(&e).to_string())
}

/// S3 (and S3-compatible) storage provider.
pub struct S3StorageProvider {
    config: S3Config,
    client: Option<Client>,
    http: reqwest::Client,
}

impl S3StorageProvider {
    /// Create a provider. The SDK client is only built from a complete config.
    pub fn new(config: S3Config) -> Self {
        let client = match (
            &config.region,
            &config.access_key_id,
            &config.secret_access_key,
            &config.bucket,
        ) {
            (Some(region), Some(access_key_id), Some(secret_access_key), Some(_)) => {
                let credentials =
                    Credentials::new(access_key_id, secret_access_key, None, None, "s3");

                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .credentials_provider(credentials)
                    .force_path_style(config.force_path_style);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }

                Some(Client::from_conf(builder.build()))
            }
            _ => None,
        };

        Self {
            config,
            client,
            http: reqwest::Client::new(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(S3Config::from_env())
    }

    fn client(&self) -> StorageResult<(&Client, &str)> {
        match (&self.client, &self.config.bucket) {
            (Some(client), Some(bucket)) => Ok((client, bucket.as_str())),
            _ => Err(StorageError::config_error(format!(
                "S3 configuration incomplete, missing: {}",
                self.config.missing_settings().join(", ")
            ))),
        }
    }

    fn presigning(&self, expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))
    }

    async fn put_multipart(
        &self,
        options: &UploadOptions,
        size: u64,
        part_size: u64,
        concurrency: usize,
    ) -> StorageResult<()> {
        let (client, bucket) = self.client()?;

        let created = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(&options.key)
            .content_type(&options.content_type)
            .send()
            .await
            .map_err(sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload_failed("S3 returned no upload id"))?
            .to_string();

        match self
            .upload_windows(options, &upload_id, size, part_size, concurrency)
            .await
        {
            Ok(parts) => {
                client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(&options.key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(sdk_error)?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(&options.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %options.key,
                        "Failed to abort multipart upload {}: {}", upload_id, sdk_error(abort_err)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_windows(
        &self,
        options: &UploadOptions,
        upload_id: &str,
        size: u64,
        part_size: u64,
        concurrency: usize,
    ) -> StorageResult<Vec<CompletedPart>> {
        let (client, bucket) = self.client()?;
        let windows = part_windows(size, part_size);
        let total = windows.len();

        let results: Vec<StorageResult<CompletedPart>> = stream::iter(windows.into_iter().enumerate())
            .map(|(index, (offset, len))| async move {
                let part_number = index as i32 + 1;
                let data = read_range(&options.file_path, offset, len).await?;
                let response = client
                    .upload_part()
                    .bucket(bucket)
                    .key(&options.key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(sdk_error)?;

                debug!(key = %options.key, "Uploaded part {}/{}", part_number, total);
                Ok::<_, StorageError>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(response.e_tag().map(|t| t.to_string()))
                        .build(),
                )
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut parts = results.into_iter().collect::<StorageResult<Vec<_>>>()?;
        parts.sort_by_key(|p| p.part_number());
        Ok(parts)
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::S3
    }

    fn validate_config(&self) -> StorageResult<()> {
        let missing = self.config.missing_settings();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StorageError::config_error(format!(
                "Missing S3 configuration: {}",
                missing.join(", ")
            )))
        }
    }

    async fn put_file(&self, options: &UploadOptions) -> StorageResult<()> {
        let (client, bucket) = self.client()?;
        let size = tokio::fs::metadata(&options.file_path).await?.len();
        let part_size = options
            .part_size
            .unwrap_or(DEFAULT_PART_SIZE)
            .max(S3_MIN_PART_SIZE);
        let concurrency = options
            .concurrency
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
            .max(1);

        info!(
            key = %options.key,
            size,
            "Uploading {} to S3 bucket {}", options.file_path.display(), bucket
        );

        if size <= part_size {
            let body = ByteStream::from_path(&options.file_path)
                .await
                .map_err(|e| StorageError::upload_failed(e.to_string()))?;

            client
                .put_object()
                .bucket(bucket)
                .key(&options.key)
                .body(body)
                .content_type(&options.content_type)
                .send()
                .await
                .map_err(sdk_error)?;
            return Ok(());
        }

        self.put_multipart(options, size, part_size, concurrency).await
    }

    async fn signed_url(&self, key: &str, options: &SignedUrlOptions) -> StorageResult<String> {
        let (client, bucket) = self.client()?;
        let presigning = self.presigning(options.expires_in.unwrap_or(self.config.signed_url_ttl))?;

        let mut request = client.get_object().bucket(bucket).key(key);
        if let Some(content_type) = &options.content_type {
            request = request.response_content_type(content_type);
        }

        let presigned = request
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(&e).to_string()))?;
        Ok(presigned.uri().to_string())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let (client, bucket) = self.client()?;

        match client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(sdk_error(e))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let (client, bucket) = self.client()?;

        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(DisplayErrorContext(&e).to_string()))?;

        info!("Deleted {} from S3", key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let (client, bucket) = self.client()?;
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(DisplayErrorContext(&e).to_string()))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    fn multipart(self: Arc<Self>) -> Arc<dyn MultipartBackend> {
        self
    }
}

#[async_trait]
impl MultipartBackend for S3StorageProvider {
    async fn initialize(&self, request: &MultipartRequest) -> StorageResult<MultipartHandle> {
        let (client, bucket) = self.client()?;

        let created = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(&request.key)
            .content_type(request.content_type.as_str())
            .send()
            .await
            .map_err(sdk_error)?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload_failed("S3 returned no upload id"))?
            .to_string();

        Ok(MultipartHandle {
            file_id: request.key.clone(),
            upload_id,
        })
    }

    async fn part_upload_url(
        &self,
        request: &MultipartRequest,
        handle: &MultipartHandle,
        part_number: u32,
    ) -> StorageResult<String> {
        let (client, bucket) = self.client()?;
        let presigning = self.presigning(self.config.signed_url_ttl)?;

        let presigned = client
            .upload_part()
            .bucket(bucket)
            .key(&request.key)
            .upload_id(&handle.upload_id)
            .part_number(part_number as i32)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
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
        let (client, bucket) = self.client()?;

        let completed = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .set_e_tag(part.etag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(&request.key)
            .upload_id(&handle.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(RecordedFile {
            id: handle.file_id.clone(),
            name: details.name.clone(),
            size: None,
            provider_key: Some(request.key.clone()),
            url: None,
        })
    }

    async fn abort(&self, request: &MultipartRequest, handle: &MultipartHandle) -> StorageResult<()> {
        let (client, bucket) = self.client()?;

        client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(&request.key)
            .upload_id(&handle.upload_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> S3Config {
        S3Config {
            region: Some("us-east-1".to_string()),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: Some("recordings".to_string()),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            force_path_style: true,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }

    #[test]
    fn test_validate_config_lists_every_missing_setting() {
        let provider = S3StorageProvider::new(S3Config {
            region: Some("eu-west-1".to_string()),
            ..S3Config::default()
        });

        let err = provider.validate_config().unwrap_err().to_string();
        assert!(err.contains("S3_ACCESS_KEY_ID"));
        assert!(err.contains("S3_SECRET_ACCESS_KEY"));
        assert!(err.contains("S3_BUCKET_NAME"));
        assert!(!err.contains("S3_REGION"));
    }

    #[test]
    fn test_validate_config_accepts_complete_config() {
        let provider = S3StorageProvider::new(full_config());
        assert!(provider.validate_config().is_ok());
        assert_eq!(provider.kind(), ProviderKind::S3);
    }

    #[tokio::test]
    async fn test_incomplete_config_fails_before_network() {
        let provider = S3StorageProvider::new(S3Config::default());
        let options = UploadOptions::new("/nonexistent.webm", "k", "video/webm");

        let err = provider.put_file(&options).await.unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
        assert!(!provider.upload_file(&options).await);
    }

    #[tokio::test]
    async fn test_part_upload_url_is_presigned() {
        let provider = Arc::new(S3StorageProvider::new(full_config()));
        let request = MultipartRequest::new("team", "private", "rec/a.webm", Default::default());
        let handle = MultipartHandle {
            file_id: "rec/a.webm".to_string(),
            upload_id: "upload-1".to_string(),
        };

        let url = provider.part_upload_url(&request, &handle, 3).await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/recordings/rec/a.webm"));
        assert!(url.contains("partNumber=3"));
        assert!(url.contains("uploadId=upload-1"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
