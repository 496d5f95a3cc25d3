//! File-level multipart upload with whole-session restarts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mbot_models::RecordedFile;
use mbot_storage::{
    part_windows, read_range, FinalizeDetails, MultipartBackend, MultipartRequest,
    DEFAULT_PART_SIZE,
};
use tracing::{info, warn};

use crate::error::{RecordingError, RecordingResult};
use crate::metrics;
use crate::retry::RetryConfig;
use crate::session::UploadSession;

/// Upload settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bytes per part
    pub part_size: u64,
    /// Attempts per part, the first included
    pub max_part_attempts: u32,
    /// Delay after the first failed part attempt (doubles each attempt)
    pub part_retry_base_delay: Duration,
    /// Sessions to try before a lost session becomes terminal
    pub max_file_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            max_part_attempts: 3,
            part_retry_base_delay: Duration::from_millis(500),
            max_file_attempts: 3,
        }
    }
}

impl UploadConfig {
    fn part_retry(&self) -> RetryConfig {
        RetryConfig::new("part upload")
            .with_max_attempts(self.max_part_attempts)
            .with_base_delay(self.part_retry_base_delay)
    }
}

/// Uploads staging files through a multipart backend.
#[derive(Clone)]
pub struct RecordingUploader {
    backend: Arc<dyn MultipartBackend>,
    config: UploadConfig,
}

impl RecordingUploader {
    pub fn new(backend: Arc<dyn MultipartBackend>, config: UploadConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `path` as one object, restarting with a new session whenever
    /// the provider reports the current one lost.
    pub async fn upload_file(
        &self,
        path: &Path,
        request: &MultipartRequest,
        details: &FinalizeDetails,
    ) -> RecordingResult<RecordedFile> {
        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecordingError::StagingFileMissing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Err(RecordingError::EmptyRecording(path.to_path_buf()));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.upload_once(path, size, request, details).await {
                Ok(file) => return Ok(file),
                Err(e) if e.is_session_invalidated() && attempt < self.config.max_file_attempts => {
                    metrics::record_session_restart();
                    warn!(
                        attempt,
                        "Multipart session lost, restarting upload session: {}", e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upload_once(
        &self,
        path: &Path,
        size: u64,
        request: &MultipartRequest,
        details: &FinalizeDetails,
    ) -> RecordingResult<RecordedFile> {
        let mut session = UploadSession::new(
            self.backend.clone(),
            request.clone(),
            self.config.part_retry(),
        );
        session.connect().await?;

        let windows = part_windows(size, self.config.part_size.max(1));
        for (index, (offset, len)) in windows.iter().copied().enumerate() {
            let part_number = index as u32 + 1;
            info!(
                "Uploading part {} (bytes {}-{})",
                part_number,
                offset,
                offset + len - 1
            );

            let data = read_range(path, offset, len).await?;
            if let Err(e) = session.upload_part(data, part_number).await {
                if !e.is_session_invalidated() {
                    session.abort().await;
                }
                return Err(e);
            }
        }

        match session.finish(details).await {
            Ok(file) => {
                info!("Finished uploading {} parts", windows.len());
                Ok(file)
            }
            Err(e) => {
                if !e.is_session_invalidated() {
                    session.abort().await;
                }
                Err(e)
            }
        }
    }
}
