//! One resumable multipart upload session.

use std::sync::Arc;

use bytes::Bytes;
use mbot_models::RecordedFile;
use mbot_storage::{
    FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
    StorageError,
};
use tracing::{error, info, warn};

use crate::error::{RecordingError, RecordingResult};
use crate::metrics;
use crate::retry::{retry_with_resilience, RetryConfig};

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connected(MultipartHandle),
    Finalized(RecordedFile),
    Aborted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Connected(_) => "connected",
            SessionState::Finalized(_) => "finalized",
            SessionState::Aborted => "aborted",
        }
    }
}

/// A multipart upload of one file. Sessions are never reused: a lost
/// session is replaced by a new one.
pub struct UploadSession {
    backend: Arc<dyn MultipartBackend>,
    request: MultipartRequest,
    retry: RetryConfig,
    state: SessionState,
    parts: Vec<PartReceipt>,
}

impl UploadSession {
    pub fn new(backend: Arc<dyn MultipartBackend>, request: MultipartRequest, retry: RetryConfig) -> Self {
        Self {
            backend,
            request,
            retry,
            state: SessionState::Uninitialized,
            parts: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn parts(&self) -> &[PartReceipt] {
        &self.parts
    }

    pub fn handle(&self) -> Option<&MultipartHandle> {
        match &self.state {
            SessionState::Connected(handle) => Some(handle),
            _ => None,
        }
    }

    fn connected_handle(&self) -> RecordingResult<&MultipartHandle> {
        self.handle().ok_or(RecordingError::InvalidSessionState {
            expected: "connected",
            actual: self.state.name(),
        })
    }

    /// Open the multipart upload. Allowed once per session.
    pub async fn connect(&mut self) -> RecordingResult<&MultipartHandle> {
        if self.state != SessionState::Uninitialized {
            return Err(RecordingError::InvalidSessionState {
                expected: "uninitialized",
                actual: self.state.name(),
            });
        }

        info!(team_id = %self.request.team_id, "Uploader connecting");
        let handle = self.backend.initialize(&self.request).await?;
        info!(
            team_id = %self.request.team_id,
            file_id = %handle.file_id,
            "Uploader connected"
        );

        self.state = SessionState::Connected(handle);
        self.connected_handle()
    }

    /// Upload one part, retrying transient failures.
    ///
    /// Parts must arrive in order starting from 1. A lost session is returned
    /// at once and leaves the session aborted.
    pub async fn upload_part(&mut self, data: Bytes, part_number: u32) -> RecordingResult<()> {
        let expected = self.parts.len() as u32 + 1;
        if part_number != expected {
            return Err(RecordingError::PartOutOfOrder {
                expected,
                got: part_number,
            });
        }

        let handle = self.connected_handle()?;
        let backend = &self.backend;
        let request = &self.request;
        let config = RetryConfig {
            operation_name: format!("part {}", part_number),
            ..self.retry.clone()
        };

        info!(part_number, bytes = data.len(), "Uploader sending part");
        let result = retry_with_resilience(
            &config,
            StorageError::is_session_invalidated,
            |_attempt| {
                let data = data.clone();
                async move {
                    let url = backend.part_upload_url(request, handle, part_number).await?;
                    backend.upload_part(request, &url, part_number, data).await
                }
            },
        )
        .await;

        match result {
            Ok(receipt) => {
                metrics::record_part_uploaded();
                info!(part_number, "Uploader completed part");
                self.parts.push(receipt);
                Ok(())
            }
            Err(e) => {
                if e.is_session_invalidated() {
                    error!(part_number, "Multipart session no longer exists: {}", e);
                    self.state = SessionState::Aborted;
                }
                Err(e.into())
            }
        }
    }

    /// Commit the uploaded parts.
    pub async fn finish(&mut self, details: &FinalizeDetails) -> RecordingResult<RecordedFile> {
        let handle = self.connected_handle()?;
        info!(parts = self.parts.len(), "Uploader finishing upload");

        match self
            .backend
            .finalize(&self.request, handle, &self.parts, details)
            .await
        {
            Ok(file) => {
                info!(name = %file.name, "Finished recording upload");
                self.state = SessionState::Finalized(file.clone());
                Ok(file)
            }
            Err(e) => {
                if e.is_session_invalidated() {
                    self.state = SessionState::Aborted;
                }
                Err(e.into())
            }
        }
    }

    /// Give up on the session, releasing it on the backend when possible.
    pub async fn abort(&mut self) {
        if let SessionState::Connected(handle) = &self.state {
            if let Err(e) = self.backend.abort(&self.request, handle).await {
                warn!("Failed to abort multipart upload {}: {}", handle.upload_id, e);
            }
        }
        self.state = SessionState::Aborted;
    }
}
