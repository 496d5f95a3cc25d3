//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Provider error codes meaning the multipart upload no longer exists.
const SESSION_INVALIDATED_MARKERS: &[&str] = &["NoSuchUpload", "InvalidBlockList"];

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Upload session no longer exists: {0}")]
    SessionInvalidated(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Operation not supported by {provider} provider: {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    pub fn unsupported(provider: &'static str, operation: &'static str) -> Self {
        Self::Unsupported {
            provider,
            operation,
        }
    }

    /// Build an error from a non-success HTTP response.
    ///
    /// Bodies carrying a provider "no such upload" code become
    /// [`StorageError::SessionInvalidated`].
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if contains_session_marker(&body) {
            return Self::SessionInvalidated(format!("HTTP {}: {}", status, body));
        }
        if status == 404 {
            return Self::NotFound(body);
        }
        Self::Http { status, body }
    }

    /// Build an error from an AWS SDK error message.
    pub fn from_sdk_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if contains_session_marker(&msg) {
            Self::SessionInvalidated(msg)
        } else {
            Self::AwsSdk(msg)
        }
    }

    /// Check if the provider reported that the multipart session is gone.
    ///
    /// Such errors must not be retried part by part; the whole upload has to
    /// restart with a new session.
    pub fn is_session_invalidated(&self) -> bool {
        match self {
            StorageError::SessionInvalidated(_) => true,
            StorageError::Http { body, .. } => contains_session_marker(body),
            StorageError::AwsSdk(msg) | StorageError::UploadFailed(msg) => {
                contains_session_marker(msg)
            }
            _ => false,
        }
    }

    /// Check if a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Http { status, .. } => *status == 429 || *status >= 500,
            StorageError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StorageError::Io(_) | StorageError::AwsSdk(_) | StorageError::UploadFailed(_) => true,
            _ => false,
        }
    }
}

fn contains_session_marker(text: &str) -> bool {
    SESSION_INVALIDATED_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_upload_body_is_session_invalidated() {
        let body = "<?xml version='1.0' encoding='UTF-8'?><Error><Code>NoSuchUpload</Code>\
                    <Message>The requested upload was not found.</Message></Error>";
        let err = StorageError::from_http_status(404, body);
        assert!(matches!(err, StorageError::SessionInvalidated(_)));
        assert!(err.is_session_invalidated());
    }

    #[test]
    fn test_plain_404_is_not_found() {
        let err = StorageError::from_http_status(404, "missing");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_session_invalidated());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(StorageError::from_http_status(503, "unavailable").is_retryable());
        assert!(StorageError::from_http_status(429, "slow down").is_retryable());
        assert!(!StorageError::from_http_status(400, "bad request").is_retryable());
    }

    #[test]
    fn test_sdk_message_classification() {
        assert!(StorageError::from_sdk_message("service error: NoSuchUpload").is_session_invalidated());
        assert!(!StorageError::from_sdk_message("dispatch failure").is_session_invalidated());
    }

    #[test]
    fn test_azure_invalid_block_list_is_session_invalidated() {
        let err = StorageError::from_http_status(400, "<Error><Code>InvalidBlockList</Code></Error>");
        assert!(err.is_session_invalidated());
    }
}
