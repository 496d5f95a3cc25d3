//! Meeting recording pipeline.
//!
//! This crate provides:
//! - Ordered, failure-tolerant persistence of streamed chunks to a staging file
//! - Resumable multipart upload sessions with part retry and session restart
//! - The per-job `DiskUploader` tying both together

pub mod chunk_writer;
pub mod disk_uploader;
pub mod error;
pub mod log_aggregator;
pub mod metrics;
pub mod retry;
pub mod session;
pub mod staging;
pub mod uploader;

#[cfg(test)]
mod testing;

pub use chunk_writer::{ChunkSink, ChunkWriter, ChunkWriterConfig, FileSink};
pub use disk_uploader::{DiskUploader, UploadTarget, DEFAULT_FOLDER_ID};
pub use error::{RecordingError, RecordingResult};
pub use retry::{retry_with_resilience, FailureTracker, RetryConfig};
pub use session::{SessionState, UploadSession};
pub use staging::StagingArea;
pub use uploader::{RecordingUploader, UploadConfig};
