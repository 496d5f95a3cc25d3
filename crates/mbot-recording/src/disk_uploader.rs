//! Stage a recording on disk during the meeting, upload it afterwards.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use mbot_models::{recording_name, ContentType, RecordedFile, TempFileId};
use mbot_storage::{FinalizeDetails, MultipartRequest};
use tracing::{error, info, warn};

use crate::chunk_writer::{ChunkWriter, ChunkWriterConfig};
use crate::error::{RecordingError, RecordingResult};
use crate::metrics;
use crate::staging::{self, StagingArea};
use crate::uploader::RecordingUploader;

/// Folder recordings land in unless told otherwise.
pub const DEFAULT_FOLDER_ID: &str = "private";

/// Where a recording comes from and where it goes.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub user_id: String,
    pub team_id: String,
    pub folder_id: String,
    pub temp_file_id: TempFileId,
    pub content_type: ContentType,
    /// Object key for providers addressed by key
    pub object_key: String,
    /// e.g. "Zoom Recording"
    pub name_prefix: String,
    /// Team timezone used in the recording name
    pub timezone: String,
    pub bot_id: Option<String>,
}

/// Per-job pipeline: chunks to a staging file, staging file to storage.
pub struct DiskUploader {
    target: UploadTarget,
    file_path: PathBuf,
    writer: ChunkWriter,
    uploader: RecordingUploader,
}

impl DiskUploader {
    /// Prepare the staging folder and a writer for this job's file.
    pub async fn initialize(
        staging: &StagingArea,
        target: UploadTarget,
        uploader: RecordingUploader,
        writer_config: ChunkWriterConfig,
    ) -> RecordingResult<Self> {
        if let Err(e) = staging.ensure_folder(&target.user_id).await {
            error!(user_id = %target.user_id, "Failed to create staging directory: {}", e);
            return Err(e);
        }

        let file_path = staging.file_path(&target.user_id, &target.temp_file_id, target.content_type);
        let writer = ChunkWriter::for_file(&file_path, writer_config, target.user_id.clone());

        Ok(Self {
            target,
            file_path,
            writer,
            uploader,
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// Queue a recorded chunk for the staging file.
    pub fn save_chunk(&self, data: Bytes) -> bool {
        let saved = self.writer.save_chunk(data);
        if !saved {
            info!(user_id = %self.target.user_id, "Unable to save the chunk to disk");
        }
        saved
    }

    /// Finish staging and upload. Logs and returns `false` on any failure;
    /// the staging file is kept unless the upload succeeded.
    pub async fn upload_recording(&self) -> bool {
        match self.upload_recording_file().await {
            Ok(file) => {
                metrics::record_upload(true);
                info!(
                    user_id = %self.target.user_id,
                    team_id = %self.target.team_id,
                    file_id = %file.id,
                    "Recording uploaded as {}", file.name
                );
                true
            }
            Err(e) => {
                metrics::record_upload(false);
                error!(
                    user_id = %self.target.user_id,
                    team_id = %self.target.team_id,
                    "Unable to upload recording, staging file kept at {}: {}",
                    self.file_path.display(),
                    e
                );
                false
            }
        }
    }

    /// As [`Self::upload_recording`], returning the stored file or the error.
    pub async fn upload_recording_file(&self) -> RecordingResult<RecordedFile> {
        if !self.writer.finalize().await {
            return Err(RecordingError::writer_incomplete(format!(
                "{} for user {}",
                self.file_path.display(),
                self.target.user_id
            )));
        }
        self.writer.flush_logs();

        if !staging::file_exists(&self.file_path).await {
            return Err(RecordingError::StagingFileMissing(self.file_path.clone()));
        }

        let request = MultipartRequest::new(
            self.target.team_id.clone(),
            self.target.folder_id.clone(),
            self.target.object_key.clone(),
            self.target.content_type,
        );

        let (name, resolved) = recording_name(&self.target.name_prefix, &self.target.timezone, Utc::now());
        if !resolved {
            warn!(
                team_id = %self.target.team_id,
                timezone = %self.target.timezone,
                "Using UTC time, found an invalid timezone on team"
            );
        }
        let details = FinalizeDetails {
            name,
            bot_id: self.target.bot_id.clone(),
        };

        let file = self
            .uploader
            .upload_file(&self.file_path, &request, &details)
            .await?;

        staging::remove_file(&self.file_path).await;
        Ok(file)
    }
}
