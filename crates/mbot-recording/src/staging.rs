//! On-disk staging area for recordings in progress.

use std::path::{Path, PathBuf};

use mbot_models::{ContentType, TempFileId};
use tracing::{info, warn};

use crate::error::RecordingResult;

/// Root directory holding one folder per user.
///
/// Layout: `<root>/<user_id>/<temp_file_id>.<ext>`.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_path(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    pub fn file_path(&self, user_id: &str, temp_file_id: &TempFileId, content_type: ContentType) -> PathBuf {
        self.folder_path(user_id)
            .join(format!("{}.{}", temp_file_id, content_type.extension()))
    }

    /// Create the user's folder if missing.
    pub async fn ensure_folder(&self, user_id: &str) -> RecordingResult<PathBuf> {
        let folder = self.folder_path(user_id);
        if tokio::fs::try_exists(&folder).await? {
            info!(user_id, "Found staging directory {}", folder.display());
        } else {
            tokio::fs::create_dir_all(&folder).await?;
            info!(user_id, "Created staging directory {}", folder.display());
        }
        Ok(folder)
    }
}

pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Delete a staging file, logging rather than failing.
pub async fn remove_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Staging file deleted: {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not clean up staging file {}: {}", path.display(), e);
            false
        }
    }
}
