//! Recording pipeline error types.

use std::path::PathBuf;

use mbot_storage::StorageError;
use thiserror::Error;

pub type RecordingResult<T> = Result<T, RecordingError>;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Staging file not found: {}", .0.display())]
    StagingFileMissing(PathBuf),

    #[error("Staging file is empty: {}", .0.display())]
    EmptyRecording(PathBuf),

    #[error("Staging file could not be finalized: {0}")]
    WriterIncomplete(String),

    #[error("Upload session is {actual}, expected {expected}")]
    InvalidSessionState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Part {got} uploaded out of order, expected {expected}")]
    PartOutOfOrder { expected: u32, got: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordingError {
    pub fn writer_incomplete(msg: impl Into<String>) -> Self {
        Self::WriterIncomplete(msg.into())
    }

    /// Check if the multipart session was lost and the file must restart.
    pub fn is_session_invalidated(&self) -> bool {
        match self {
            RecordingError::Storage(e) => e.is_session_invalidated(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_invalidation_passes_through() {
        let err = RecordingError::from(StorageError::from_http_status(
            404,
            "<Error><Code>NoSuchUpload</Code></Error>",
        ));
        assert!(err.is_session_invalidated());
        assert!(!RecordingError::EmptyRecording(PathBuf::from("/tmp/a.webm")).is_session_invalidated());
    }
}
