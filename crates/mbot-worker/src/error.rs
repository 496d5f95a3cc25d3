//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A failure the job itself has classified.
    #[error("{message}")]
    Known {
        message: String,
        retryable: bool,
        /// Attempts this failure allows, the first included
        max_retries: u32,
    },

    #[error("Recording source failed: {0}")]
    SourceFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Recording error: {0}")]
    Recording(#[from] mbot_recording::RecordingError),

    #[error("Storage error: {0}")]
    Storage(#[from] mbot_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] mbot_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the JobStore treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Terminal immediately
    NonRetryable,
    /// Retried while the declared budget lasts
    Retryable { max_retries: u32 },
    /// Retried up to the store's ceiling
    Unclassified,
}

impl WorkerError {
    /// A failure that must not be retried.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Known {
            message: msg.into(),
            retryable: false,
            max_retries: 0,
        }
    }

    /// A failure worth retrying, up to `max_retries` attempts.
    pub fn retryable(msg: impl Into<String>, max_retries: u32) -> Self {
        Self::Known {
            message: msg.into(),
            retryable: true,
            max_retries,
        }
    }

    pub fn source_failed(msg: impl Into<String>) -> Self {
        Self::SourceFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn classify(&self) -> ErrorClass {
        match self {
            WorkerError::Known {
                retryable: false, ..
            } => ErrorClass::NonRetryable,
            WorkerError::Known { max_retries, .. } => ErrorClass::Retryable {
                max_retries: *max_retries,
            },
            WorkerError::ConfigError(_) => ErrorClass::NonRetryable,
            _ => ErrorClass::Unclassified,
        }
    }

    /// Check if error is retryable at all.
    pub fn is_retryable(&self) -> bool {
        self.classify() != ErrorClass::NonRetryable
    }
}
